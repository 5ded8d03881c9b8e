pub mod config;
pub mod eligibility;
pub mod notify;
pub mod persistence;

pub use {
    config::Configuration,
    eligibility::Eligibility,
    notify::Notifier,
    persistence::{Store, Transaction},
};
