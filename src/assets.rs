pub const FRAME_RATE: i32 = 30;
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Number of counted frames after which a session is finalized.
pub const FRAME_BUDGET: u64 = 200;

// overlay
pub const LABEL_FONT_SIZE: u32 = 20;
pub const LABEL_COLOR: [u8; 4] = [255, 255, 255, 255];
pub const LABEL_SHADOW: [u8; 4] = [0, 0, 0, 255];

// encoder sink
pub const SINK_QUEUE_DEPTH: usize = 8;
pub const LIBRARY_DIR_NAME: &str = "framestamp-library";

