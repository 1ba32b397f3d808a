#![deny(warnings)]

use persistence::{default_sqlite_url, prepare_sqlite_path};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| default_sqlite_url().to_string());
    prepare_sqlite_path(&url)?;
    let pool = persistence::init_db(&url).await?;
    let ticks = persistence::load_ticks(&pool).await?;
    let jobs = persistence::load_jobs(&pool).await?;
    println!(
        "DB migrated at {} | tick rows: {} | job rows: {}",
        url,
        ticks.len(),
        jobs.len()
    );
    pool.close().await;
    Ok(())
}
