use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

use courier::config::Config;
use courier::poll::driver::Driver;
use courier::server::Context;
use courier::server::files::static_files;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let htdocs = cfg
        .htdocs
        .clone()
        .context("no htdocs configured; set `htdocs` in the file named by COURIER_CONFIG")?;

    let driver = Driver::new();
    let mut context = Context::new(Box::new(driver.poller()), cfg.idle_reap_interval());

    let (host, port) = cfg.listen_host_port()?;
    context
        .serve_tcp(host, port)
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    if let Some(path) = &cfg.unix_socket {
        context
            .serve_unix(path)
            .with_context(|| format!("binding {}", path.display()))?;
    }
    context.listen(None, "", static_files(&htdocs)?);
    tracing::info!(htdocs = %htdocs.display(), "serving files");

    let context = Rc::new(RefCell::new(context));
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            tokio::select! {
                res = driver.run(Rc::clone(&context)) => {
                    res?;
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                }
            }
            Ok::<_, anyhow::Error>(())
        })
        .await?;

    if let Some(path) = &cfg.unix_socket {
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}
