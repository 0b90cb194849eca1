//! 行编解码
//!
//! 帧格式:
//! ```text
//! ┌──────────────────────────────┬──────┐
//! │      Payload (UTF-8 text)    │ '\n' │
//! └──────────────────────────────┴──────┘
//! ```
//!
//! 没有长度前缀，也不做转义：载荷中内嵌的 `\n` 会被对端读成多条消息。

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ProtocolError, Result};
use crate::{LINE_DELIMITER, MAX_LINE_LEN};

/// 读取上限：正文 + "\r\n"
const READ_LIMIT: usize = MAX_LINE_LEN + 2;

/// 行读取器
pub struct LineReader<R> {
    reader: BufReader<R>,
    /// 被取消的读取会把已读字节留在这里，下次继续
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// 创建新的行读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: Vec::new(),
        }
    }

    /// 读取下一行（去掉行尾的 `\n` 或 `\r\n`）
    ///
    /// 对端关闭时返回 [`ProtocolError::ConnectionClosed`]。
    /// 最后一行若没有换行符，仍作为一条消息返回。
    pub async fn read_line(&mut self) -> Result<String> {
        let limit = READ_LIMIT.saturating_sub(self.buffer.len()) as u64;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(LINE_DELIMITER, &mut self.buffer)
            .await
            .map_err(ProtocolError::from_io)?;

        if n == 0 && self.buffer.is_empty() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let terminated = self.buffer.last() == Some(&LINE_DELIMITER);
        if !terminated && self.buffer.len() >= READ_LIMIT {
            let len = self.buffer.len();
            self.buffer.clear();
            return Err(ProtocolError::LineTooLong {
                len,
                max: MAX_LINE_LEN,
            });
        }

        let mut line = &self.buffer[..];
        if terminated {
            line = &line[..line.len() - 1];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
        }
        if line.len() > MAX_LINE_LEN {
            let len = line.len();
            self.buffer.clear();
            return Err(ProtocolError::LineTooLong {
                len,
                max: MAX_LINE_LEN,
            });
        }

        let text = String::from_utf8_lossy(line).into_owned();
        self.buffer.clear();
        Ok(text)
    }
}

/// 行写入器
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// 创建新的行写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一行并立即 flush，每次调用都是一条独立的消息
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        if line.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong {
                len: line.len(),
                max: MAX_LINE_LEN,
            });
        }

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(LINE_DELIMITER);

        self.writer
            .write_all(&frame)
            .await
            .map_err(ProtocolError::from_io)?;
        self.writer.flush().await.map_err(ProtocolError::from_io)?;
        Ok(())
    }

    /// 关闭写方向（对端将读到 EOF）
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(ProtocolError::from_io)
    }
}
