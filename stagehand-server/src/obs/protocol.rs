//! OBS WebSocket v5 message shapes.
//!
//! Every frame is a JSON text message `{"op": <opcode>, "d": {...}}`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use stagehand_core::Timestamp;

pub const RPC_VERSION: u32 = 1;

pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// Event subscription bit for output (recording, streaming, replay) events
pub const SUBSCRIBE_OUTPUTS: u32 = 1 << 6;

pub const OUTPUT_STARTED: &str = "OBS_WEBSOCKET_OUTPUT_STARTED";
pub const OUTPUT_STOPPED: &str = "OBS_WEBSOCKET_OUTPUT_STOPPED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_string(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    BASE64.encode(Sha256::digest(format!("{}{}", secret, challenge).as_bytes()))
}

pub fn identify(authentication: Option<String>) -> Envelope {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": SUBSCRIBE_OUTPUTS,
    });
    if let Some(auth) = authentication {
        d["authentication"] = Value::String(auth);
    }
    Envelope { op: op::IDENTIFY, d }
}

pub fn request(request_type: &str, request_id: &str, data: Option<Value>) -> Envelope {
    let mut d = json!({
        "requestType": request_type,
        "requestId": request_id,
    });
    if let Some(data) = data {
        d["requestData"] = data;
    }
    Envelope { op: op::REQUEST, d }
}

/// OBS timecodes look like `01:02:03.456`.
pub fn parse_timecode(value: Option<&Value>) -> Option<Timestamp> {
    value?.as_str()?.parse().ok()
}

/// Strip the `data:image/png;base64,` prefix and decode.
pub fn decode_image_data(data: &str) -> Option<Vec<u8>> {
    let payload = match data.split_once(',') {
        Some((_, payload)) => payload,
        None => data,
    };
    BASE64.decode(payload.trim()).ok().filter(|bytes| !bytes.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_string() {
        // Example from the obs-websocket protocol documentation
        assert_eq!(
            auth_string(
                "supersecretpassword",
                "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
                "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY="
            ),
            "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4="
        );
    }

    #[test]
    fn test_envelopes() {
        let identify = serde_json::to_value(identify(Some("abc".to_string()))).unwrap();
        assert_eq!(identify["op"], 1);
        assert_eq!(identify["d"]["authentication"], "abc");
        assert_eq!(identify["d"]["eventSubscriptions"], 64);

        let req = serde_json::to_value(request("GetRecordStatus", "7", None)).unwrap();
        assert_eq!(req["op"], 6);
        assert_eq!(req["d"]["requestId"], "7");
        assert!(req["d"].get("requestData").is_none());

        let response: Envelope = serde_json::from_str(
            r#"{"op":7,"d":{"requestType":"GetRecordStatus","requestId":"7",
                "requestStatus":{"result":true,"code":100},
                "responseData":{"outputActive":true,"outputTimecode":"00:00:05.000"}}}"#,
        )
        .unwrap();
        let response: RequestResponse = serde_json::from_value(response.d).unwrap();
        assert!(response.request_status.result);
        assert_eq!(
            parse_timecode(response.response_data.as_ref().and_then(|d| d.get("outputTimecode"))),
            Some(Timestamp::from_secs(5))
        );
    }

    #[test]
    fn test_decode_image_data() {
        assert_eq!(decode_image_data("data:image/png;base64,AQID"), Some(vec![1, 2, 3]));
        assert_eq!(decode_image_data("AQID"), Some(vec![1, 2, 3]));
        assert_eq!(decode_image_data("data:image/png;base64,"), None);
        assert_eq!(decode_image_data("!!"), None);
    }
}
