//! Messages of the function invocation protocol.
//!
//! A call is a Go `net/rpc` exchange over gob: the caller writes an
//! [`RpcRequest`] header followed by an [`InvokeRequest`] body, the function
//! answers with an [`RpcResponse`] header followed by an [`InvokeResponse`]
//! body. Field names match the Go runtime library's message types.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::gob::{
    FieldType, FieldsExt, GobError, GobMessage, GobResult, TypeId, Value, WireType, BOOL, BYTES,
    FIRST_USER_ID, INT, STRING, UINT,
};

/// RPC method every function process serves.
pub const INVOKE_METHOD: &str = "Function.Invoke";

/// Request id sent with every invocation.
pub const SYNTHETIC_REQUEST_ID: &str = "0";

const RPC_REQUEST: TypeId = FIRST_USER_ID;
const RPC_RESPONSE: TypeId = FIRST_USER_ID + 1;
const DEADLINE: TypeId = FIRST_USER_ID + 2;
const INVOKE_REQUEST: TypeId = FIRST_USER_ID + 3;
const INVOKE_RESPONSE: TypeId = FIRST_USER_ID + 4;
const HEADERS: TypeId = FIRST_USER_ID + 5;
const INVOKE_ERROR: TypeId = FIRST_USER_ID + 6;
const STACK_TRACE: TypeId = FIRST_USER_ID + 7;
const STACK_FRAME: TypeId = FIRST_USER_ID + 8;

/// Descriptors of every type this side sends, whichever role it plays.
pub fn schema() -> Vec<WireType> {
    vec![
        WireType::structure(
            "Request",
            RPC_REQUEST,
            vec![
                FieldType::new("ServiceMethod", STRING),
                FieldType::new("Seq", UINT),
            ],
        ),
        WireType::structure(
            "Response",
            RPC_RESPONSE,
            vec![
                FieldType::new("ServiceMethod", STRING),
                FieldType::new("Seq", UINT),
                FieldType::new("Error", STRING),
            ],
        ),
        WireType::structure(
            "InvokeRequest_Timestamp",
            DEADLINE,
            vec![FieldType::new("Seconds", INT), FieldType::new("Nanos", INT)],
        ),
        WireType::structure(
            "InvokeRequest",
            INVOKE_REQUEST,
            vec![
                FieldType::new("Payload", BYTES),
                FieldType::new("RequestId", STRING),
                FieldType::new("XAmznTraceId", STRING),
                FieldType::new("Deadline", DEADLINE),
                FieldType::new("InvokedFunctionArn", STRING),
                FieldType::new("CognitoIdentityId", STRING),
                FieldType::new("CognitoIdentityPoolId", STRING),
                FieldType::new("ClientContext", BYTES),
            ],
        ),
        WireType::structure(
            "InvokeResponse",
            INVOKE_RESPONSE,
            vec![
                FieldType::new("Payload", BYTES),
                FieldType::new("Headers", HEADERS),
                FieldType::new("Error", INVOKE_ERROR),
            ],
        ),
        WireType::map("map[string]string", HEADERS, STRING, STRING),
        WireType::structure(
            "InvokeResponse_Error",
            INVOKE_ERROR,
            vec![
                FieldType::new("Message", STRING),
                FieldType::new("Type", STRING),
                FieldType::new("StackTrace", STACK_TRACE),
                FieldType::new("ShouldExit", BOOL),
            ],
        ),
        WireType::slice("[]*messages.InvokeResponse_Error_StackFrame", STACK_TRACE, STACK_FRAME),
        WireType::structure(
            "InvokeResponse_Error_StackFrame",
            STACK_FRAME,
            vec![
                FieldType::new("Path", STRING),
                FieldType::new("Line", INT),
                FieldType::new("Label", STRING),
            ],
        ),
    ]
}

// ============================================================================
// net/rpc framing
// ============================================================================

/// Header written before every call body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcRequest {
    /// `Service.Method` being called.
    pub service_method: String,
    /// Caller-chosen sequence number echoed in the response.
    pub seq: u64,
}

impl GobMessage for RpcRequest {
    const TYPE_ID: TypeId = RPC_REQUEST;

    fn to_value(&self) -> Value {
        Value::structure([
            ("ServiceMethod", Value::String(self.service_method.clone())),
            ("Seq", Value::Uint(self.seq)),
        ])
    }

    fn from_value(value: Value) -> GobResult<Self> {
        let mut fields = value.into_fields()?;
        Ok(Self {
            service_method: fields.take_string("ServiceMethod")?,
            seq: fields.take_uint("Seq")?,
        })
    }
}

/// Header written before every reply body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcResponse {
    /// Echo of the request's method.
    pub service_method: String,
    /// Echo of the request's sequence number.
    pub seq: u64,
    /// RPC-level failure; empty on success.
    pub error: String,
}

impl GobMessage for RpcResponse {
    const TYPE_ID: TypeId = RPC_RESPONSE;

    fn to_value(&self) -> Value {
        Value::structure([
            ("ServiceMethod", Value::String(self.service_method.clone())),
            ("Seq", Value::Uint(self.seq)),
            ("Error", Value::String(self.error.clone())),
        ])
    }

    fn from_value(value: Value) -> GobResult<Self> {
        let mut fields = value.into_fields()?;
        Ok(Self {
            service_method: fields.take_string("ServiceMethod")?,
            seq: fields.take_uint("Seq")?,
            error: fields.take_string("Error")?,
        })
    }
}

// ============================================================================
// Invocation messages
// ============================================================================

/// Absolute deadline as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    /// Whole seconds.
    pub seconds: i64,
    /// Sub-second nanoseconds.
    pub nanos: i64,
}

impl Deadline {
    /// Latest representable deadline, the last second of year 9999.
    pub const MAX: Self = Self {
        seconds: 253_402_300_799,
        nanos: 0,
    };

    /// The deadline `timeout` from now, clamped to [`Deadline::MAX`].
    pub fn after(timeout: Duration) -> Self {
        SystemTime::now()
            .checked_add(timeout)
            .map_or(Self::MAX, Self::from)
    }

    /// Time left until the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        SystemTime::from(*self)
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }

    fn to_value(self) -> Value {
        Value::structure([
            ("Seconds", Value::Int(self.seconds)),
            ("Nanos", Value::Int(self.nanos)),
        ])
    }

    fn from_value(value: Value) -> GobResult<Self> {
        let mut fields = value.into_fields()?;
        Ok(Self {
            seconds: fields.take_int("Seconds")?,
            nanos: fields.take_int("Nanos")?,
        })
    }
}

impl From<SystemTime> for Deadline {
    fn from(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        match i64::try_from(since_epoch.as_secs()) {
            Ok(seconds) if seconds < Self::MAX.seconds => Self {
                seconds,
                nanos: i64::from(since_epoch.subsec_nanos()),
            },
            _ => Self::MAX,
        }
    }
}

impl From<Deadline> for SystemTime {
    fn from(deadline: Deadline) -> Self {
        let seconds = deadline.seconds.clamp(0, Deadline::MAX.seconds) as u64;
        let nanos = deadline.nanos.clamp(0, 999_999_999) as u64;
        UNIX_EPOCH + Duration::from_secs(seconds) + Duration::from_nanos(nanos)
    }
}

/// Body of a `Function.Invoke` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeRequest {
    /// JSON-encoded event.
    pub payload: Bytes,
    /// Request identifier.
    pub request_id: String,
    /// Tracing header value.
    pub trace_id: String,
    /// When the caller stops caring about the answer.
    pub deadline: Deadline,
    /// Resource name the function was invoked under.
    pub invoked_function_arn: String,
    /// Caller identity.
    pub cognito_identity_id: String,
    /// Caller identity pool.
    pub cognito_identity_pool_id: String,
    /// JSON-encoded client context.
    pub client_context: Bytes,
}

impl InvokeRequest {
    /// A request carrying `payload` with the synthetic request id and empty
    /// tracing and identity fields.
    pub fn new(payload: impl Into<Bytes>, deadline: Deadline) -> Self {
        Self {
            payload: payload.into(),
            request_id: SYNTHETIC_REQUEST_ID.to_string(),
            deadline,
            ..Self::default()
        }
    }
}

impl GobMessage for InvokeRequest {
    const TYPE_ID: TypeId = INVOKE_REQUEST;

    fn to_value(&self) -> Value {
        Value::structure([
            ("Payload", Value::Bytes(self.payload.to_vec())),
            ("RequestId", Value::String(self.request_id.clone())),
            ("XAmznTraceId", Value::String(self.trace_id.clone())),
            ("Deadline", self.deadline.to_value()),
            (
                "InvokedFunctionArn",
                Value::String(self.invoked_function_arn.clone()),
            ),
            (
                "CognitoIdentityId",
                Value::String(self.cognito_identity_id.clone()),
            ),
            (
                "CognitoIdentityPoolId",
                Value::String(self.cognito_identity_pool_id.clone()),
            ),
            ("ClientContext", Value::Bytes(self.client_context.to_vec())),
        ])
    }

    fn from_value(value: Value) -> GobResult<Self> {
        let mut fields = value.into_fields()?;
        Ok(Self {
            payload: fields.take_bytes("Payload")?.into(),
            request_id: fields.take_string("RequestId")?,
            trace_id: fields.take_string("XAmznTraceId")?,
            deadline: match fields.take_value("Deadline") {
                Some(value) => Deadline::from_value(value)?,
                None => Deadline::default(),
            },
            invoked_function_arn: fields.take_string("InvokedFunctionArn")?,
            cognito_identity_id: fields.take_string("CognitoIdentityId")?,
            cognito_identity_pool_id: fields.take_string("CognitoIdentityPoolId")?,
            client_context: fields.take_bytes("ClientContext")?.into(),
        })
    }
}

/// One frame of a function-reported stack trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFrame {
    /// Source file.
    pub path: String,
    /// Line number.
    pub line: i64,
    /// Function name.
    pub label: String,
}

/// Error reported by the function itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeError {
    /// Error message.
    pub message: String,
    /// Error type name.
    pub error_type: String,
    /// Optional stack trace.
    pub stack_trace: Vec<StackFrame>,
    /// Whether the function asked to be torn down.
    pub should_exit: bool,
}

impl InvokeError {
    /// An error without a stack trace.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            ..Self::default()
        }
    }

    fn to_value(&self) -> Value {
        let frames = self
            .stack_trace
            .iter()
            .map(|frame| {
                Value::structure([
                    ("Path", Value::String(frame.path.clone())),
                    ("Line", Value::Int(frame.line)),
                    ("Label", Value::String(frame.label.clone())),
                ])
            })
            .collect();
        Value::structure([
            ("Message", Value::String(self.message.clone())),
            ("Type", Value::String(self.error_type.clone())),
            ("StackTrace", Value::List(frames)),
            ("ShouldExit", Value::Bool(self.should_exit)),
        ])
    }

    fn from_value(value: Value) -> GobResult<Self> {
        let mut fields = value.into_fields()?;
        let stack_trace = match fields.take_value("StackTrace") {
            None => Vec::new(),
            Some(Value::List(frames)) => frames
                .into_iter()
                .map(|frame| {
                    let mut frame = frame.into_fields()?;
                    Ok(StackFrame {
                        path: frame.take_string("Path")?,
                        line: frame.take_int("Line")?,
                        label: frame.take_string("Label")?,
                    })
                })
                .collect::<GobResult<_>>()?,
            Some(other) => return Err(GobError::field_mismatch("StackTrace", "list", other.kind())),
        };
        Ok(Self {
            message: fields.take_string("Message")?,
            error_type: fields.take_string("Type")?,
            stack_trace,
            should_exit: fields.take_bool("ShouldExit")?,
        })
    }
}

/// Body of a `Function.Invoke` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeResponse {
    /// JSON-encoded result.
    pub payload: Bytes,
    /// Response headers set by the function.
    pub headers: HashMap<String, String>,
    /// Function-reported failure.
    pub error: Option<InvokeError>,
}

impl InvokeResponse {
    /// A successful response.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// A function-reported failure.
    pub fn failed(error: InvokeError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

impl GobMessage for InvokeResponse {
    const TYPE_ID: TypeId = INVOKE_RESPONSE;

    fn to_value(&self) -> Value {
        let mut headers: Vec<_> = self.headers.iter().collect();
        headers.sort();
        let headers = headers
            .into_iter()
            .map(|(k, v)| (Value::String(k.clone()), Value::String(v.clone())))
            .collect();

        let mut fields = vec![
            ("Payload", Value::Bytes(self.payload.to_vec())),
            ("Headers", Value::Map(headers)),
        ];
        // A nil pointer on the Go side: the field is simply absent.
        if let Some(error) = &self.error {
            fields.push(("Error", error.to_value()));
        }
        Value::structure(fields)
    }

    fn from_value(value: Value) -> GobResult<Self> {
        let mut fields = value.into_fields()?;
        let headers = match fields.take_value("Headers") {
            None => HashMap::new(),
            Some(Value::Map(entries)) => entries
                .into_iter()
                .map(|entry| match entry {
                    (Value::String(k), Value::String(v)) => Ok((k, v)),
                    (k, v) => Err(GobError::field_mismatch(
                        "Headers",
                        "string pair",
                        &format!("{}/{}", k.kind(), v.kind()),
                    )),
                })
                .collect::<GobResult<_>>()?,
            Some(other) => return Err(GobError::field_mismatch("Headers", "map", other.kind())),
        };
        Ok(Self {
            payload: fields.take_bytes("Payload")?.into(),
            headers,
            error: fields.take_value("Error").map(InvokeError::from_value).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gob::{Decoder, Encoder};

    fn round_trip<M: GobMessage>(message: &M) -> M {
        let bytes = Encoder::new(schema())
            .encode(M::TYPE_ID, &message.to_value())
            .unwrap();
        let mut values = Decoder::new().decode_stream(&bytes).unwrap();
        M::from_value(values.remove(0).1).unwrap()
    }

    #[test]
    fn test_invoke_request_carries_every_field() {
        let request = InvokeRequest {
            trace_id: "Root=1".to_string(),
            invoked_function_arn: "arn:aws:lambda:us-east-1:123456789012:function:echo"
                .to_string(),
            client_context: Bytes::from_static(b"{}"),
            ..InvokeRequest::new(
                Bytes::from_static(br#"{"name":"x"}"#),
                Deadline {
                    seconds: 1_700_000_000,
                    nanos: 5,
                },
            )
        };
        assert_eq!(round_trip(&request), request);
        assert_eq!(request.request_id, "0");
    }

    #[test]
    fn test_error_response() {
        let mut error = InvokeError::new("errorString", "boom");
        error.stack_trace.push(StackFrame {
            path: "main.go".to_string(),
            line: 12,
            label: "main.handler".to_string(),
        });
        let response = InvokeResponse::failed(error);
        assert_eq!(round_trip(&response), response);
    }

    #[test]
    fn test_nil_error_is_absent() {
        let mut response = InvokeResponse::ok(Bytes::from_static(b"null"));
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        let decoded = round_trip(&response);
        assert!(decoded.error.is_none());
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_deadline_conversion() {
        let deadline = Deadline::after(Duration::from_secs(3));
        let remaining = deadline.remaining();
        assert!(remaining <= Duration::from_secs(3));
        assert!(remaining > Duration::from_secs(2));
        assert!((0..1_000_000_000).contains(&deadline.nanos));
    }

    #[test]
    fn test_rpc_header_with_zero_seq() {
        let header = RpcRequest {
            service_method: INVOKE_METHOD.to_string(),
            seq: 0,
        };
        assert_eq!(round_trip(&header), header);
    }

    #[test]
    fn test_deadline_saturates_for_huge_timeouts() {
        assert_eq!(Deadline::after(Duration::from_secs(u64::MAX)), Deadline::MAX);
        assert_eq!(Deadline::after(Duration::MAX), Deadline::MAX);
        assert!(Deadline::MAX.remaining() > Duration::from_secs(86_400 * 365));

        let soon = Deadline::after(Duration::from_secs(30));
        assert!(soon.seconds < Deadline::MAX.seconds);
        assert!(soon.remaining() <= Duration::from_secs(30));

        let corrupt = Deadline {
            seconds: i64::MAX,
            nanos: i64::MAX,
        };
        let clamped = Deadline {
            seconds: Deadline::MAX.seconds,
            nanos: 999_999_999,
        };
        assert_eq!(SystemTime::from(corrupt), SystemTime::from(clamped));
    }
}
