use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tierpoll::boot::init_common();
    let matches = tierpoll::cli::parse_args();
    tierpoll::boot::start_poller(&matches).await
}
