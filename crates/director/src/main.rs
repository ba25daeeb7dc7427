//! Director daemon binary.
//!
//! Synchronizes the kernel IPVS table with a declarative model of virtual
//! services. Config events arrive as newline-delimited JSON on stdin; the
//! `print` argument dumps the current kernel state instead.

use director::{Config, ConfigEvent, Driver, Reconciler};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The config decides the log filter, so load it before tracing is up.
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {}, using defaults", e);
            Config::default()
        }
    };

    common::logging::init(config.debug);

    let mut driver = Driver::setup(&config)?;

    if std::env::args().nth(1).as_deref() == Some("print") {
        driver.print(&mut std::io::stdout())?;
        return Ok(());
    }

    info!("Director starting");

    // The kernel begins in a known-empty state matching the empty model.
    driver.sync()?;

    let (tx, rx) = mpsc::channel::<ConfigEvent>(1024);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ConfigEvent>(line) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "discarding malformed event"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "event stream read failed");
                    break;
                }
            }
        }
        info!("event stream closed");
    });

    Reconciler::new(driver, config).run(rx).await;

    Ok(())
}
