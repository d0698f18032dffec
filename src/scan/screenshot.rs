use crate::context::RunContext;
use crate::error::Result;
use crate::external::tools;
use crate::utils::sanitize_filename;

pub const SCREENSHOT_DIR: &str = "screenshots";

/// Captures one PNG per live URL with cutycapt under a virtual display.
/// Returns how many captures succeeded.
pub async fn capture_screenshots(ctx: &RunContext, urls: &[String]) -> Result<usize> {
    let dir = ctx.path(SCREENSHOT_DIR);
    std::fs::create_dir_all(&dir)?;
    tracing::info!("Taking screenshots of {} live hosts", urls.len());

    let mut captured = 0;
    for url in urls {
        if ctx.stealth {
            ctx.rotate_identity(url).await;
        }
        let out = dir.join(format!("{}.png", sanitize_filename(url)));
        let result = ctx.executor.execute(&ctx.route(tools::cutycapt(url, &out))).await;
        match result.check() {
            Ok(()) => captured += 1,
            Err(e) => tracing::warn!("Screenshot of {} failed: {}", url, e),
        }
    }
    tracing::info!("Saved {} screenshots to {}", captured, dir.display());
    Ok(captured)
}
