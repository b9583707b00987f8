use std::io;
use std::sync::Arc;

use video_minifier_core::config::{AppConfig, STALE_SCRATCH_MAX_AGE};
use video_minifier_core::logging;
use video_minifier_core::rpc::{self, RpcServer};
use video_minifier_core::sidecar_api::SidecarApp;

fn main() -> io::Result<()> {
    logging::init();
    let config = AppConfig::from_env();
    let app = Arc::new(SidecarApp::from_config(&config));
    app.cleanup_startup_temp(STALE_SCRATCH_MAX_AGE);
    log::info!(
        target: "video_minifier::sidecar",
        "Serving library {}",
        config.library_dir.display()
    );

    let server = RpcServer::new(app, rpc::shared_writer(io::stdout()));
    server.forward_library_changes()?;
    server.serve(io::stdin().lock());
    Ok(())
}
