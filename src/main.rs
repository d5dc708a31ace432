// =============================================================================
// KINDLE - Minimal Vulkan engine core
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, window signals)                         │
// │    └── FrameLoop (slot cycling, stale/minimized state)          │
// │          └── Renderer: FrameDriver                              │
// │                ├── Swapchain (images, views, framebuffers)      │
// │                ├── FrameSlot x2 (commands, semaphores, fence)   │
// │                ├── UploadContext (blocking transfers)           │
// │                └── VulkanDevice (instance, surface, allocator)  │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the current slot's fence
// 2. Acquire a swapchain image
// 3. Reset the fence and command buffer, record
// 4. Submit (image available -> render finished)
// 5. Present, advance to the next slot
//
// =============================================================================

use anyhow::Result;
use kindle::app::App;
use kindle::config::Config;
use std::fs::{File, OpenOptions};
use std::io::Write;
use winit::event_loop::EventLoop;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml; report it once logging is up
    let (config, source) = Config::load();

    init_logging(&config);
    log::info!("Starting Kindle");
    source.log();
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Surface the error that stopped the loop, if any
    match app.take_error() {
        Some(e) => Err(e),
        None => {
            log::info!("Clean exit");
            Ok(())
        }
    }
}

/// Initialize logging, optionally teeing every record into a log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match open_log_file(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(Tee {
                    file,
                    stderr: std::io::stderr(),
                })));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

/// Create/clear the log file and write a header
fn open_log_file(path: &str) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    writeln!(file, "=== Kindle Log ===")?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;
    Ok(file)
}

/// Writes everything to both stderr and the log file
struct Tee {
    file: File,
    stderr: std::io::Stderr,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stderr.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stderr.flush()?;
        self.file.flush()
    }
}
