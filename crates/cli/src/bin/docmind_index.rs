use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    docmind_index_cli::main_entry().await
}
