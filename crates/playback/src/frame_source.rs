use annotations::FrameIndex;
use image::RgbaImage;
use media_io::FrameDecoder;
use tracing::debug;

/// "Give me the decoded image for frame N".
pub trait FrameSource: Send {
    /// `None` when the frame could not be produced; callers keep showing what
    /// they showed last.
    fn get_frame(&mut self, index: FrameIndex) -> Option<&RgbaImage>;
}

/// Single-entry cache: the most recently decoded frame.
#[derive(Debug, Default)]
pub struct FrameCache {
    entry: Option<(FrameIndex, RgbaImage)>,
}

impl FrameCache {
    pub fn cached_index(&self) -> Option<FrameIndex> {
        self.entry.as_ref().map(|(i, _)| *i)
    }

    pub fn get(&self, index: FrameIndex) -> Option<&RgbaImage> {
        match &self.entry {
            Some((i, image)) if *i == index => Some(image),
            _ => None,
        }
    }

    pub fn store(&mut self, index: FrameIndex, image: RgbaImage) {
        self.entry = Some((index, image));
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

/// In-process decoder fronted by a [`FrameCache`].
///
/// Requests for the frame right after the last one read are served by a plain
/// sequential read; anything else seeks first.
pub struct DecodedFrameSource<D = Box<dyn FrameDecoder>> {
    decoder: D,
    cache: FrameCache,
    /// Index the next `read_next` will return; `None` once a failure left it unknown.
    position: Option<FrameIndex>,
}

impl<D: FrameDecoder> DecodedFrameSource<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            cache: FrameCache::default(),
            position: Some(0),
        }
    }

    pub fn position(&self) -> Option<FrameIndex> {
        self.position
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    fn decode(&mut self, index: FrameIndex) -> Option<RgbaImage> {
        if self.position != Some(index) {
            if let Err(e) = self.decoder.seek(index) {
                debug!(index, error = %e, "seek failed");
                self.position = None;
                return None;
            }
            self.position = Some(index);
        }
        match self.decoder.read_next() {
            Ok(Some(image)) => {
                self.position = Some(index + 1);
                Some(image)
            }
            Ok(None) => {
                debug!(index, "decoder reached end of stream");
                self.position = None;
                None
            }
            Err(e) => {
                debug!(index, error = %e, "frame decode failed");
                self.position = None;
                None
            }
        }
    }
}

impl<D: FrameDecoder> FrameSource for DecodedFrameSource<D> {
    fn get_frame(&mut self, index: FrameIndex) -> Option<&RgbaImage> {
        if self.cache.cached_index() != Some(index) {
            let image = self.decode(index)?;
            self.cache.store(index, image);
        }
        self.cache.get(index)
    }
}

/// Used when an external player owns the pixels.
#[derive(Debug, Default)]
pub struct NullFrameSource;

impl FrameSource for NullFrameSource {
    fn get_frame(&mut self, _index: FrameIndex) -> Option<&RgbaImage> {
        None
    }
}
