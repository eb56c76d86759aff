//! PCM block stream over the driver's watch channel.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, ready};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::driver::PcmBlock;

/// Adapts the decode driver's watch channel into a `Stream` of PCM
/// blocks. Empty observations (the channel's initial state, or gaps
/// between decodes) are skipped; the stream ends when the driver task
/// drops its sender.
pub struct PcmStream {
    inner: WatchStream<Option<Arc<PcmBlock>>>,
}

impl PcmStream {
    pub fn new(rx: watch::Receiver<Option<Arc<PcmBlock>>>) -> Self {
        Self { inner: WatchStream::new(rx) }
    }
}

impl Stream for PcmStream {
    type Item = Arc<PcmBlock>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Some(block)) => return Poll::Ready(Some(block)),
                Some(None) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LastFrameInfo;
    use futures::StreamExt;

    fn block(n: u8) -> Arc<PcmBlock> {
        Arc::new(PcmBlock { pcm: vec![n; 8], frame: LastFrameInfo::default() })
    }

    #[tokio::test]
    async fn skips_empty_observations_and_ends_with_the_sender() {
        let (tx, rx) = watch::channel(None);
        let mut stream = PcmStream::new(rx);

        tx.send(Some(block(1))).unwrap();
        assert_eq!(stream.next().await.unwrap().pcm, vec![1; 8]);

        tx.send(None).unwrap();
        tx.send(Some(block(2))).unwrap();
        assert_eq!(stream.next().await.unwrap().pcm, vec![2; 8]);

        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
