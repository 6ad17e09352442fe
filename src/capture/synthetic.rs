use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureFrame, CaptureSource};
use crate::pipeline::MediaTime;

/// Paced test-pattern source.
///
/// Produces a moving BGRA colour gradient at a fixed nominal rate. Frame `n`
/// carries the timestamp `n / fps`. Delivery uses `try_send`, so frames the
/// consumer cannot take right away are discarded instead of queued.
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    fps: i32,
    cancel_token: Option<CancellationToken>,
    released: bool,
}

impl SyntheticCapture {
    pub fn new(width: u32, height: u32, fps: i32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            cancel_token: None,
            released: false,
        }
    }

    /// Gradient frame for index `n`; the pattern scrolls one step per frame.
    pub fn pattern_frame(width: u32, height: u32, fps: i32, n: u64) -> CaptureFrame {
        let stride = width as usize * 4;
        let mut data = vec![0u8; stride * height as usize];
        let (w, h) = (width.max(1) as u64, height.max(1) as u64);
        let shift = n * 4;
        for y in 0..height as u64 {
            let row = &mut data[y as usize * stride..(y as usize + 1) * stride];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let x = x as u64;
                px[0] = ((x + shift) % w * 255 / w) as u8; // B
                px[1] = (y * 255 / h) as u8; // G
                px[2] = ((x + y + shift) / 2 % 256) as u8; // R
                px[3] = 255;
            }
        }
        CaptureFrame::new(
            MediaTime::from_frames(n, fps),
            width,
            height,
            stride,
            Bytes::from(data),
        )
    }
}

#[async_trait]
impl CaptureSource for SyntheticCapture {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn nominal_fps(&self) -> i32 {
        self.fps
    }

    async fn start(&mut self, output: mpsc::Sender<CaptureFrame>) -> Result<()> {
        if self.released {
            return Err(anyhow!("Capture source already released"));
        }
        if self.cancel_token.is_some() {
            return Err(anyhow!("Capture already running"));
        }

        let cancel = CancellationToken::new();
        self.cancel_token = Some(cancel.clone());

        let (w, h, fps) = (self.width, self.height, self.fps);
        tokio::spawn(async move {
            let started = Instant::now();
            let mut n = 0u64;
            let mut discarded = 0u64;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let frame = SyntheticCapture::pattern_frame(w, h, fps, n);
                match output.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        discarded += 1;
                        log::trace!("Synthetic capture: late frame {} discarded", n);
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::debug!("Synthetic capture: consumer gone");
                        break;
                    }
                }
                n += 1;

                // pace against the start instant so timing errors do not accumulate
                let next = started + MediaTime::from_frames(n, fps).as_duration();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(next.into()) => {}
                }
            }

            log::debug!(
                "Synthetic capture stopped after {} frames ({} discarded)",
                n,
                discarded
            );
        });

        log::info!("Synthetic capture started ({}x{} @ {} fps)", w, h, fps);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel_token.take() {
            cancel.cancel();
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel_token.take() {
            cancel.cancel();
        }
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frame_geometry() {
        let frame = SyntheticCapture::pattern_frame(8, 4, 30, 45);
        assert_eq!(frame.stride, 32);
        assert_eq!(frame.data.len(), 128);
        assert_eq!(frame.pts, MediaTime::new(45, 30));
        assert!(frame.data_ready);
        assert!(frame.data.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[tokio::test]
    async fn test_delivers_increasing_timestamps_until_stopped() {
        let mut source = SyntheticCapture::new(4, 4, 200);
        let (tx, mut rx) = mpsc::channel(64);
        source.start(tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.pts.is_zero());
        assert!(second.pts > first.pts);

        source.stop().await.unwrap();
        source.release();
        // producer exits and drops its sender
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut source = SyntheticCapture::new(4, 4, 30);
        let (tx, _rx) = mpsc::channel(1);
        source.start(tx.clone()).await.unwrap();
        assert!(source.start(tx).await.is_err());
        source.release();
    }
}
