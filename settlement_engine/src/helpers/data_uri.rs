//! RFC 2397 `data:` URIs, used to carry payloads inside streaming messages.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataUriError {
    #[error("Not a data URI")]
    NotADataUri,
    #[error("Only base64 encoded data URIs are supported")]
    NotBase64,
    #[error("Invalid base64 data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Encodes `data` as `data:{mime_type};base64,{data}`.
pub fn encode<B: AsRef<[u8]>>(data: B, mime_type: &str) -> String {
    format!("data:{mime_type};base64,{}", base64::encode(data.as_ref()))
}

pub fn decode(uri: &str) -> Result<DataUri, DataUriError> {
    let rest = uri.strip_prefix("data:").ok_or(DataUriError::NotADataUri)?;
    let (meta, data) = rest.split_once(',').ok_or(DataUriError::NotADataUri)?;
    let mime_type = meta.strip_suffix(";base64").ok_or(DataUriError::NotBase64)?;
    let data = base64::decode(data)?;
    Ok(DataUri { mime_type: mime_type.to_string(), data })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_and_decode() {
        let uri = encode(r#"{"transferState":"COMMITTED"}"#, "application/json");
        assert_eq!(uri, "data:application/json;base64,eyJ0cmFuc2ZlclN0YXRlIjoiQ09NTUlUVEVEIn0=");
        let decoded = decode(&uri).unwrap();
        assert_eq!(decoded.mime_type, "application/json");
        assert_eq!(decoded.data, br#"{"transferState":"COMMITTED"}"#);
    }

    #[test]
    fn rejects_other_uris() {
        assert!(matches!(decode("http://example.com"), Err(DataUriError::NotADataUri)));
        assert!(matches!(decode("data:text/plain,hello"), Err(DataUriError::NotBase64)));
        assert!(matches!(decode("data:text/plain;base64,!!"), Err(DataUriError::InvalidBase64(_))));
    }
}
