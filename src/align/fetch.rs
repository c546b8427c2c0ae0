use std::panic;
use std::thread;

use snafu::ResultExt;
use tracing::trace;

use crate::error::{Error, Result, Stage, StreamSnafu};
use crate::samples::Samples;
use crate::stream::{read_full, ReadStream};

/// Fill `buffers[i]` from `readers[i]` for every stream, concurrently
///
/// One scoped thread per reader performs a full (retry until filled) read.
/// All reads are joined before returning. When several readers fail the
/// error of the lowest stream index is returned, wrapped with that index and
/// `stage`; callers must not rely on which failure that is.
///
/// # Arguments
/// * `readers` - one reader per stream
/// * `buffers` - one buffer per reader, in the reader's sample format
/// * `stage` - label attached to a failure
pub fn read_buffers<R: ReadStream>(
    readers: &mut [R],
    buffers: &mut [Samples],
    stage: Stage,
) -> Result<()> {
    if readers.len() != buffers.len() {
        return Err(Error::LengthMismatch {
            lengths: vec![readers.len(), buffers.len()],
        });
    }
    trace!(streams = readers.len(), %stage, "fetching buffers");

    let results: Vec<Result<usize>> = thread::scope(|scope| {
        let handles: Vec<_> = readers
            .iter_mut()
            .zip(buffers.iter_mut())
            .map(|(reader, buf)| scope.spawn(move || read_full(reader, buf.as_mut())))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            })
            .collect()
    });

    for (index, result) in results.into_iter().enumerate() {
        result.context(StreamSnafu { index, stage })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::{Complex32, SampleFormat, SamplesMut};
    use crate::simulation::SyntheticStream;
    use std::sync::Arc;

    struct Broken;

    impl ReadStream for Broken {
        fn read(&mut self, _buf: SamplesMut<'_>) -> Result<usize> {
            Ok(0)
        }

        fn sample_rate(&self) -> u32 {
            1000
        }

        fn sample_format(&self) -> SampleFormat {
            SampleFormat::C64
        }
    }

    #[test]
    fn test_every_buffer_is_filled() {
        let signal: Vec<Complex32> = (0..100).map(|i| Complex32::new(i as f32, 0.0)).collect();
        let signal = Arc::new(signal);
        let mut readers: Vec<SyntheticStream> = (0..3)
            .map(|i| SyntheticStream::new(Arc::clone(&signal), 1000).with_delay(i * 10))
            .collect();
        let mut buffers: Vec<Samples> = (0..3).map(|_| Samples::new(SampleFormat::C64, 16)).collect();

        read_buffers(&mut readers, &mut buffers, Stage::Fetch).unwrap();
        for (i, buf) in buffers.iter().enumerate() {
            assert_eq!(buf.as_c64().unwrap()[0].re, (i * 10) as f32);
        }
    }

    #[test]
    fn test_failure_is_tagged_with_stream_index() {
        let signal = Arc::new(vec![Complex32::new(1.0, 0.0); 10]);
        let mut readers: Vec<Box<dyn ReadStream>> = vec![
            Box::new(SyntheticStream::new(Arc::clone(&signal), 1000)),
            Box::new(Broken),
        ];
        let mut buffers = vec![
            Samples::new(SampleFormat::C64, 4),
            Samples::new(SampleFormat::C64, 4),
        ];

        let err = read_buffers(&mut readers, &mut buffers, Stage::Measuring).unwrap_err();
        match err {
            Error::Stream { index, stage, ref source } => {
                assert_eq!(index, 1);
                assert_eq!(stage, Stage::Measuring);
                assert!(matches!(**source, Error::UnexpectedEof));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_reader_buffer_count_mismatch() {
        let signal = Arc::new(vec![Complex32::new(1.0, 0.0); 10]);
        let mut readers = vec![SyntheticStream::new(signal, 1000)];
        let mut buffers: Vec<Samples> = Vec::new();
        assert!(matches!(
            read_buffers(&mut readers, &mut buffers, Stage::Fetch),
            Err(Error::LengthMismatch { .. })
        ));
    }
}
