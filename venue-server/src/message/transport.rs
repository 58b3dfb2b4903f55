//! 推送帧读写
//!
//! `[type u8][len u32 LE][payload]`，payload 为 JSON，长度上限
//! [`MAX_FRAME_LEN`]。

use shared::message::{Frame, FrameType, MAX_FRAME_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::utils::AppError;

/// 从异步流中读取一帧
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Frame, AppError> {
    // 帧类型 (1 字节)
    let mut type_buf = [0u8; 1];
    match reader.read_exact(&mut type_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(AppError::ClientDisconnected);
        }
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            return Err(AppError::ClientDisconnected);
        }
        Err(e) => return Err(AppError::internal(format!("Read type failed: {}", e))),
    }

    let frame_type = FrameType::try_from(type_buf[0])
        .map_err(|_| AppError::invalid(format!("Invalid frame type: {}", type_buf[0])))?;

    // 载荷长度 (4 字节)
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| AppError::internal(format!("Read len failed: {}", e)))?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(AppError::invalid(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| AppError::internal(format!("Read payload failed: {}", e)))?;

    Ok(Frame::new(frame_type, payload))
}

/// 向异步流写入一帧
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), AppError> {
    if frame.payload.len() > MAX_FRAME_LEN {
        return Err(AppError::invalid(format!(
            "Frame too large: {} bytes (max {})",
            frame.payload.len(),
            MAX_FRAME_LEN
        )));
    }
    writer
        .write_all(&frame.encode())
        .await
        .map_err(|e| AppError::internal(format!("Write failed: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::internal(format!("Flush failed: {}", e)))?;
    Ok(())
}
