//! Line codec for [`Message`] over async byte channels.

use finch_types::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write one message line and flush it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.encode().map_err(std::io::Error::other)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
