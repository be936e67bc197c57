pub mod error;
pub mod normalize;
pub mod server;
pub mod service;
pub mod settings;
pub mod torch;

/// Fixed geometry of the digit pipeline. These must agree with the data the
/// network was trained on, so they are not part of the runtime settings
pub mod config {
    /// Side of the square raster the network consumes
    pub const CANVAS_SIZE: u32 = 28;

    /// Side of the box the digit's ink is rescaled into before centering
    pub const DIGIT_SIZE: u32 = 20;

    /// Pixels at or below this intensity are treated as background
    pub const INK_THRESHOLD: u8 = 10;

    /// Number of output classes (the digits 0 through 9)
    pub const NUM_CLASSES: usize = 10;

    /// Where the service looks for weights when nothing else is configured
    pub const DEFAULT_MODEL_FILE: &str = "model/mnist_cnn.ot";

    /// Name of the optional config file picked up from the working directory
    pub const CONFIG_FILE: &str = "digitd";

    /// Prefix of environment overrides, e.g. `DIGITD_SERVER__PORT=9000`
    pub const ENV_PREFIX: &str = "DIGITD";
}

/// Process-level helpers shared by both binaries
pub mod util {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    /// Install the global tracing subscriber. `RUST_LOG` wins over the
    /// configured filter
    pub fn init_tracing(default_filter: &str) {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

}
