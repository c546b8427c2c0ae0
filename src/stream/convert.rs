use crate::error::Result;
use crate::samples::{convert_to_c64, SampleFormat, Samples, SamplesMut};

use super::ReadStream;

/// Default size of the native-format staging buffer
const STAGING_LEN: usize = 16 * 1024;

/// Presents any reader as a C64 reader
///
/// Native samples land in a staging buffer that is allocated once and
/// converted with a bounds-checked copy. Readers that already produce C64
/// are passed straight through.
pub struct ConvertReader<R> {
    inner: R,
    staging: Option<Samples>,
}

impl<R: ReadStream> ConvertReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_staging_len(inner, STAGING_LEN)
    }

    pub fn with_staging_len(inner: R, staging_len: usize) -> Self {
        let staging = match inner.sample_format() {
            SampleFormat::C64 => None,
            format => Some(Samples::new(format, staging_len.max(1))),
        };
        Self { inner, staging }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ReadStream> ReadStream for ConvertReader<R> {
    fn read(&mut self, buf: SamplesMut<'_>) -> Result<usize> {
        let out = buf.into_c64()?;
        let Some(staging) = self.staging.as_mut() else {
            return self.inner.read(SamplesMut::C64(out));
        };

        let want = out.len().min(staging.len());
        let n = {
            let mut view = staging.as_mut();
            self.inner.read(view.slice(0..want))?
        };
        convert_to_c64(staging, n, out)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn sample_format(&self) -> SampleFormat {
        SampleFormat::C64
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
