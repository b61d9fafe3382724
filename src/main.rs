#[tokio::main]
async fn main() {
    if let Err(e) = inline_translate::run().await {
        eprintln!("inline-translate: {e}");
        std::process::exit(1);
    }
}
