use crate::error::GeneratorError;
use futures_util::{stream::BoxStream, StreamExt};

/// Splits a chunked HTTP body into lines.
///
/// Both server sent events and newline delimited JSON are line based,
/// but the chunk boundaries of the body have nothing to do with the
/// line boundaries, so a line may span multiple chunks.
pub(crate) struct LineStream {
    inner: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buf: Vec<u8>,
    done: bool,
}

impl LineStream {
    pub fn new(response: reqwest::Response) -> Self {
        Self::from_stream(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
        )
    }

    pub fn from_stream(inner: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> Self {
        Self {
            inner,
            buf: vec![],
            done: false,
        }
    }

    /// Returns the next non-empty line without its terminator,
    /// or `None` once the body is exhausted.
    pub async fn next_line(&mut self) -> Option<Result<String, GeneratorError>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                if line.is_empty() {
                    continue;
                }
                return Some(Ok(line.to_string()));
            }

            if self.done {
                if self.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut self.buf);
                return Some(Ok(String::from_utf8_lossy(&rest).into_owned()));
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Some(Err(GeneratorError::Reqwest(e))),
                None => self.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LineStream;
    use futures_util::StreamExt;

    fn lines_from(chunks: &[&str]) -> LineStream {
        let chunks = chunks
            .iter()
            .map(|c| Ok(c.as_bytes().to_vec()))
            .collect::<Vec<_>>();
        LineStream::from_stream(futures_util::stream::iter(chunks).boxed())
    }

    #[tokio::test]
    async fn joins_lines_across_chunks() {
        let mut lines = lines_from(&["data: hel", "lo\r\n\r\ndata: wor", "ld\n", "tail"]);

        assert_eq!("data: hello", lines.next_line().await.unwrap().unwrap());
        assert_eq!("data: world", lines.next_line().await.unwrap().unwrap());
        assert_eq!("tail", lines.next_line().await.unwrap().unwrap());
        assert!(lines.next_line().await.is_none());
    }

    #[tokio::test]
    async fn empty_body_has_no_lines() {
        let mut lines = lines_from(&[]);
        assert!(lines.next_line().await.is_none());
    }
}
