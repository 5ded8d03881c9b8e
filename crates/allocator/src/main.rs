#[tokio::main]
async fn main() {
    allocator::start(std::env::args()).await;
}
