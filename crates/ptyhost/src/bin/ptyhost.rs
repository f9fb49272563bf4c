#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let code = ptyhost::cli::run().await?;

    // Make sure nothing is left buffered before exiting
    use std::io::{self, Write};
    let _ = io::stderr().flush();
    let _ = io::stdout().flush();

    std::process::exit(code)
}
