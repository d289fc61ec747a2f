//! Exclusive access to a non-thread-safe slide reader.

use std::sync::{Mutex, MutexGuard};

use super::{Region, SlideReader};
use crate::error::{Result, TilerError};
use crate::PixelBuffer;

/// Serializes all access to a [`SlideReader`].
///
/// The lock covers the raw read and the RGBA to RGB conversion only. The
/// reader itself is never handed out.
pub struct RegionGate {
    reader: Mutex<Box<dyn SlideReader>>,
    dimensions: (u32, u32),
}

impl RegionGate {
    /// Wrap a reader.
    pub fn new(reader: Box<dyn SlideReader>) -> Self {
        let dimensions = reader.dimensions();
        Self {
            reader: Mutex::new(reader),
            dimensions,
        }
    }

    /// Level-0 dimensions (cached, no locking).
    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Fetch the RGB pixels of a level-0 region.
    pub fn fetch(&self, region: &Region) -> Result<PixelBuffer> {
        let (w, h) = self.dimensions;
        if region.is_empty() {
            return Err(TilerError::Read(format!("Empty region {}", region)));
        }
        if !region.fits_within(w, h) {
            return Err(TilerError::Read(format!(
                "Region {} outside slide bounds {}x{}",
                region, w, h
            )));
        }

        let buffer = {
            let mut reader = self.lock()?;
            let rgba = reader
                .read_region(region.x, region.y, 0, region.width, region.height)
                .map_err(|e| as_read_failure(region, e))?;
            PixelBuffer::from_rgba(region.width, region.height, &rgba)
                .map_err(|e| TilerError::Read(format!("Reader returned bad data for {}: {}", region, e)))?
        };

        log::trace!("Fetched region {}", region);
        Ok(buffer)
    }

    /// Read a whole pyramid level as RGB.
    pub fn read_level(&self, level: usize) -> Result<PixelBuffer> {
        let mut reader = self.lock()?;
        let (w, h) = reader
            .level_dimensions(level)
            .ok_or_else(|| TilerError::Read(format!("Level {} does not exist", level)))?;
        let rgba = reader
            .read_region(0, 0, level, w, h)
            .map_err(|e| as_read_failure(format!("level {}", level), e))?;
        PixelBuffer::from_rgba(w, h, &rgba)
            .map_err(|e| TilerError::Read(format!("Reader returned bad data for level {}: {}", level, e)))
    }

    /// Number of pyramid levels.
    pub fn level_count(&self) -> Result<usize> {
        Ok(self.lock()?.level_count())
    }

    /// Dimensions of a pyramid level.
    pub fn level_dimensions(&self, level: usize) -> Result<(u32, u32)> {
        self.lock()?
            .level_dimensions(level)
            .ok_or_else(|| TilerError::Read(format!("Level {} does not exist", level)))
    }

    /// Downsample factor of a pyramid level.
    pub fn level_downsample(&self, level: usize) -> Result<f64> {
        self.lock()?
            .level_downsample(level)
            .ok_or_else(|| TilerError::Read(format!("Level {} does not exist", level)))
    }

    /// Deepest level not exceeding `downsample`.
    pub fn best_level_for_downsample(&self, downsample: f64) -> Result<usize> {
        Ok(self.lock()?.best_level_for_downsample(downsample))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn SlideReader>>> {
        self.reader
            .lock()
            .map_err(|_| TilerError::Read("Slide reader lock poisoned".into()))
    }
}

/// Any reader error is a read failure of `what`.
fn as_read_failure(what: impl std::fmt::Display, err: TilerError) -> TilerError {
    match err {
        TilerError::Read(_) => err,
        other => TilerError::Read(format!("{}: {}", what, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Reader that counts calls overlapping in time.
    struct ExclusiveReader {
        width: u32,
        height: u32,
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl SlideReader for ExclusiveReader {
        fn level_count(&self) -> usize {
            1
        }

        fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
            (level == 0).then_some((self.width, self.height))
        }

        fn level_downsample(&self, level: usize) -> Option<f64> {
            (level == 0).then_some(1.0)
        }

        fn read_region(
            &mut self,
            x: u32,
            _y: u32,
            _level: usize,
            width: u32,
            height: u32,
        ) -> Result<Vec<u8>> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_micros(200));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.busy.store(false, Ordering::SeqCst);
            Ok(vec![(x % 251) as u8; width as usize * height as usize * 4])
        }
    }

    fn exclusive_gate() -> (RegionGate, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let overlaps = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let reader = ExclusiveReader {
            width: 1024,
            height: 1024,
            busy: Arc::new(AtomicBool::new(false)),
            overlaps: overlaps.clone(),
            calls: calls.clone(),
        };
        (RegionGate::new(Box::new(reader)), overlaps, calls)
    }

    #[test]
    fn test_concurrent_fetches_never_overlap() {
        let (gate, overlaps, calls) = exclusive_gate();

        std::thread::scope(|s| {
            for t in 0..16u32 {
                let gate = &gate;
                s.spawn(move || {
                    for i in 0..20u32 {
                        let region = Region::new((t * 20 + i) % 1000, 0, 16, 16);
                        let buf = gate.fetch(&region).unwrap();
                        assert_eq!(buf.dimensions(), (16, 16));
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 16 * 20);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fetch_out_of_bounds_is_read_failure() {
        let (gate, _, calls) = exclusive_gate();
        let err = gate.fetch(&Region::new(1000, 1000, 64, 64)).unwrap_err();
        assert!(matches!(err, TilerError::Read(_)));
        // Rejected before reaching the reader.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fetch_empty_region_rejected() {
        let (gate, _, _) = exclusive_gate();
        assert!(gate.fetch(&Region::new(0, 0, 0, 8)).is_err());
    }

    #[test]
    fn test_fetch_drops_alpha() {
        let (gate, _, _) = exclusive_gate();
        let buf = gate.fetch(&Region::new(7, 0, 2, 2)).unwrap();
        assert_eq!(buf.data, vec![7u8; 12]);
    }

    /// Reader whose storage has gone away.
    struct VanishedReader;

    impl SlideReader for VanishedReader {
        fn level_count(&self) -> usize {
            1
        }

        fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
            (level == 0).then_some((64, 64))
        }

        fn level_downsample(&self, level: usize) -> Option<f64> {
            (level == 0).then_some(1.0)
        }

        fn read_region(&mut self, _: u32, _: u32, _: usize, _: u32, _: u32) -> Result<Vec<u8>> {
            Err(TilerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "disk gone",
            )))
        }
    }

    #[test]
    fn test_reader_io_error_is_read_failure() {
        let gate = RegionGate::new(Box::new(VanishedReader));

        let err = gate.fetch(&Region::new(0, 0, 8, 8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
        assert!(err.to_string().contains("disk gone"));
        assert!(err.to_string().contains("(0, 0) 8x8"));

        let err = gate.read_level(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
    }

    #[test]
    fn test_missing_level_is_read_failure() {
        let (gate, _, _) = exclusive_gate();
        assert!(gate.level_dimensions(3).is_err());
        assert_eq!(gate.level_count().unwrap(), 1);
        assert_eq!(gate.best_level_for_downsample(16.0).unwrap(), 0);
    }
}
