use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hkp_share::{GpgConfig, GpgKeyStore, MdnsProvider, Sharing, SharingConfig};

#[derive(Parser)]
#[clap(name = "hkp-share")]
#[clap(about = "Share your OpenPGP public keys with others on the local network")]
struct Args {
    /// Port for the HKP server, 0 for any free port
    #[clap(long, env = "HKP_SHARE_PORT", default_value = "0")]
    port: u16,

    /// Address to listen on
    #[clap(long, default_value = "0.0.0.0")]
    listen: IpAddr,

    /// Display name used in the advertised service name
    #[clap(long)]
    name: Option<String>,

    /// The gpg executable
    #[clap(long, default_value = "gpg")]
    gpg: PathBuf,

    /// GnuPG home directory
    #[clap(long, env = "GNUPGHOME")]
    homedir: Option<PathBuf>,

    /// Serve keys without advertising them over mDNS
    #[clap(long)]
    no_publish: bool,

    /// Seconds to wait before reconnecting to the mDNS daemon
    #[clap(long, default_value = "1")]
    retry_delay: u64,

    /// Log level when RUST_LOG is unset
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("hkp_share={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let keystore = GpgKeyStore::new(GpgConfig {
        program: args.gpg.clone(),
        homedir: args.homedir.clone(),
    });
    keystore
        .check()
        .with_context(|| format!("can't run {}", args.gpg.display()))?;

    let config = SharingConfig {
        listen: args.listen,
        port: args.port,
        name: args.name.clone(),
        retry_delay: Duration::from_secs(args.retry_delay),
        publish: !args.no_publish,
        ..SharingConfig::default()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let (quit_tx, quit_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Quit requested");
            let _ = quit_tx.send(true);
        });

        let mut sharing = Sharing::new(config, keystore, MdnsProvider::new());
        sharing
            .run(quit_rx)
            .await
            .context("failed to share keys")
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Can't install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("SIGINT"),
        _ = term.recv() => debug!("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
