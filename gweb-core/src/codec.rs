//! # Message Codecs
//!
//! A [`Codec`] turns the typed messages of a call into frame payloads and back. Framing,
//! compression and the gRPC-Web wire encoding are applied around it by the call driver, so a
//! codec only ever sees the bare serialized message.
//!
//! * [`ProstCodec`]: statically typed `prost` messages.
//! * [`JsonCodec`]: `serde_json::Value` payloads validated against `prost-reflect` descriptors,
//!   for callers that have no generated Rust types.
use bytes::{Bytes, BytesMut};
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use std::fmt;
use std::marker::PhantomData;
use tonic::Status;

/// Serializes request messages and deserializes response messages of one method.
pub trait Codec: Clone + Send + 'static {
    type Encode: Send + 'static;
    type Decode: Send + 'static;

    /// Appends the serialized form of `item` to `dst`.
    fn encode(&mut self, item: Self::Encode, dst: &mut BytesMut) -> Result<(), Status>;

    /// Deserializes one complete frame payload.
    fn decode(&mut self, src: Bytes) -> Result<Self::Decode, Status>;
}

/// Codec for `prost` generated message types.
pub struct ProstCodec<E, D> {
    _marker: PhantomData<fn(E) -> D>,
}

impl<E, D> ProstCodec<E, D> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E, D> Default for ProstCodec<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, D> Clone for ProstCodec<E, D> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<E, D> fmt::Debug for ProstCodec<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProstCodec").finish()
    }
}

impl<E, D> Codec for ProstCodec<E, D>
where
    E: Message + Send + 'static,
    D: Message + Default + Send + 'static,
{
    type Encode = E;
    type Decode = D;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Status> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("Failed to encode message: {e}")))
    }

    fn decode(&mut self, src: Bytes) -> Result<D, Status> {
        D::decode(src).map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {e}")))
    }
}

/// A codec bridging `serde_json::Value` and the Protobuf binary format.
///
/// It holds the descriptors (schemas) for both the request and the response messages,
/// allowing it to perform dynamic serialization.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    req_desc: MessageDescriptor,
    res_desc: MessageDescriptor,
}

impl JsonCodec {
    pub fn new(req_desc: MessageDescriptor, res_desc: MessageDescriptor) -> Self {
        Self { req_desc, res_desc }
    }
}

impl Codec for JsonCodec {
    type Encode = serde_json::Value;
    type Decode = serde_json::Value;

    fn encode(&mut self, item: serde_json::Value, dst: &mut BytesMut) -> Result<(), Status> {
        // serde_json::Value is a Deserializer, the message is validated against the schema here.
        let msg = DynamicMessage::deserialize(self.req_desc.clone(), item).map_err(|e| {
            Status::invalid_argument(format!(
                "JSON structure does not match Protobuf schema: {e}"
            ))
        })?;

        msg.encode_raw(dst);
        Ok(())
    }

    fn decode(&mut self, src: Bytes) -> Result<serde_json::Value, Status> {
        let msg = DynamicMessage::decode(self.res_desc.clone(), src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {e}")))?;

        serde_json::to_value(&msg)
            .map_err(|e| Status::internal(format!("Failed to map response to JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_service::pb::EchoRequest;
    use prost_reflect::DescriptorPool;
    use serde_json::json;

    fn echo_pool() -> DescriptorPool {
        DescriptorPool::decode(echo_service::FILE_DESCRIPTOR_SET).expect("valid echo descriptors")
    }

    #[test]
    fn prost_codec_round_trips_messages() {
        let mut codec = ProstCodec::<EchoRequest, EchoRequest>::new();
        let mut buf = BytesMut::new();
        codec
            .encode(EchoRequest { message: "hi".to_string() }, &mut buf)
            .unwrap();

        let decoded = codec.decode(buf.freeze()).unwrap();
        assert_eq!(decoded.message, "hi");
    }

    #[test]
    fn json_codec_validates_against_schema() {
        let pool = echo_pool();
        let desc = pool.get_message_by_name("echo.EchoRequest").unwrap();
        let mut codec = JsonCodec::new(desc.clone(), desc);

        let mut buf = BytesMut::new();
        codec.encode(json!({ "message": "hello" }), &mut buf).unwrap();
        assert_eq!(codec.decode(buf.freeze()).unwrap(), json!({ "message": "hello" }));

        let err = codec
            .encode(json!({ "nope": 1 }), &mut BytesMut::new())
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let mut codec = ProstCodec::<EchoRequest, EchoRequest>::new();
        let err = codec.decode(Bytes::from_static(&[0xff, 0xff])).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }
}
