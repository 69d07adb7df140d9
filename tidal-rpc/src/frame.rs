// Copyright 2025 The Tidal Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Length-prefixed frame codec.

use bytes::Bytes;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tidal_common::status::{StatusCode, TidalError, TidalResult};

/// Frames above this size are rejected; an object chunk plus envelope always
/// fits well under it.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Write a request frame: `[u32 len][u8 method][body]`.
pub async fn write_request<W, M>(writer: &mut W, method: u8, body: &M) -> TidalResult<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let encoded = body.encode_to_vec();
    let len = encoded.len() + 1;
    if len > MAX_FRAME_BYTES {
        return Err(TidalError::invalid_argument(format!(
            "request frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.push(method);
    frame.extend_from_slice(&encoded);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| TidalError::io_error(format!("frame write: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TidalError::io_error(format!("frame flush: {e}")))?;
    Ok(())
}

/// Read a request frame. Returns `Ok(None)` on clean connection close.
pub async fn read_request<R>(reader: &mut R) -> TidalResult<Option<(u8, Bytes)>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TidalError::io_error(format!("frame length read: {e}"))),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_BYTES {
        return Err(TidalError::invalid_argument(format!(
            "bad frame length {len}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| TidalError::io_error(format!("frame body read: {e}")))?;
    let method = payload[0];
    Ok(Some((method, Bytes::from(payload).slice(1..))))
}

/// Write a reply frame: `[u32 len][u8 method][i8 status][body]`. On a
/// non-OK status the body is the error message.
pub async fn write_reply<W>(
    writer: &mut W,
    method: u8,
    result: &TidalResult<Vec<u8>>,
) -> TidalResult<()>
where
    W: AsyncWrite + Unpin,
{
    let (status, body): (i8, &[u8]) = match result {
        Ok(body) => (StatusCode::OK as i8, body.as_slice()),
        Err(err) => (err.code as i8, err.message.as_bytes()),
    };
    let len = body.len() + 2;
    if len > MAX_FRAME_BYTES {
        return Err(TidalError::invalid_argument(format!(
            "reply frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut frame = Vec::with_capacity(4 + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.push(method);
    frame.push(status as u8);
    frame.extend_from_slice(body);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| TidalError::io_error(format!("reply write: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TidalError::io_error(format!("reply flush: {e}")))?;
    Ok(())
}

/// Read a reply frame, surfacing a non-OK status as an error.
pub async fn read_reply<R>(reader: &mut R) -> TidalResult<(u8, Bytes)>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TidalError::io_error(format!("reply length read: {e}")))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len < 2 || len > MAX_FRAME_BYTES {
        return Err(TidalError::invalid_argument(format!(
            "bad reply length {len}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| TidalError::io_error(format!("reply body read: {e}")))?;
    let method = payload[0];
    let status = payload[1] as i8;
    let body = Bytes::from(payload).slice(2..);
    if status == StatusCode::OK as i8 {
        Ok((method, body))
    } else {
        let code = status_code_from_i8(status);
        Err(TidalError::new(
            code,
            String::from_utf8_lossy(&body).into_owned(),
        ))
    }
}

/// Map a wire status byte back to a code; unknown values become
/// `UnknownError` rather than panicking on a version skew.
pub fn status_code_from_i8(v: i8) -> StatusCode {
    use StatusCode::*;
    for code in [
        OK,
        OutOfMemory,
        KeyError,
        Invalid,
        IOError,
        UnknownError,
        NotImplemented,
        RedisError,
        TimedOut,
        Interrupted,
        IntentionalSystemExit,
        UnexpectedSystemExit,
        NotFound,
        Disconnected,
        SchedulingCancelled,
        AlreadyExists,
        ObjectExists,
        ObjectNotFound,
        ObjectAlreadySealed,
        ObjectStoreFull,
        TransientObjectStoreFull,
        ObjectLost,
        OwnerDied,
        OutOfDisk,
        ActorDied,
        RpcError,
        OutOfResource,
        Infeasible,
        InvalidArgument,
        ChannelError,
        ChannelTimeoutError,
        ChannelFull,
    ] {
        if code as i8 == v {
            return code;
        }
    }
    UnknownError
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidal_proto::common::Address;

    #[tokio::test]
    async fn test_request_roundtrip() {
        let addr = Address {
            node_id: vec![1; 28],
            ip_address: "127.0.0.1".to_string(),
            port: 1234,
            worker_id: vec![2; 28],
        };
        let mut buf = Vec::new();
        write_request(&mut buf, 7, &addr).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let (method, body) = read_request(&mut cursor).await.unwrap().unwrap();
        assert_eq!(method, 7);
        let decoded = Address::decode(body).unwrap();
        assert_eq!(decoded, addr);
    }

    #[tokio::test]
    async fn test_eof_is_clean_close() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        assert!(read_request(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_ok_roundtrip() {
        let mut buf = Vec::new();
        write_reply(&mut buf, 3, &Ok(b"payload".to_vec()))
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let (method, body) = read_reply(&mut cursor).await.unwrap();
        assert_eq!(method, 3);
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn test_reply_error_roundtrip() {
        let mut buf = Vec::new();
        write_reply(&mut buf, 3, &Err(TidalError::object_lost("all copies gone")))
            .await
            .unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_reply(&mut cursor).await.unwrap_err();
        assert!(err.is_object_lost());
        assert_eq!(err.message, "all copies gone");
    }

    #[test]
    fn test_status_code_mapping_total() {
        assert_eq!(status_code_from_i8(0), StatusCode::OK);
        assert_eq!(status_code_from_i8(26), StatusCode::ObjectLost);
        assert_eq!(status_code_from_i8(-5), StatusCode::UnknownError);
    }
}
