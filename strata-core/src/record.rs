use prost::Message;

/// The unit appended to and returned from the log: an opaque byte value
/// plus the offset the log assigned to it at append time.
///
/// Records are encoded as protobuf messages so equal inputs always
/// serialize to the same bytes and a record round-trips byte-for-byte
/// through append and read.
#[derive(Clone, PartialEq, Message)]
pub struct Record {
    #[prost(bytes = "vec", tag = "1")]
    pub value: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
}

impl Record {
    /// Creates a record carrying `value`. The offset is assigned by the
    /// log when the record is appended.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Record {
            value: value.into(),
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let record = Record {
            value: b"hello world".to_vec(),
            offset: 7,
        };

        let bytes = record.encode_to_vec();
        let decoded = Record::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = Record {
            value: vec![1, 2, 3],
            offset: 99,
        };
        let b = a.clone();
        assert_eq!(a.encode_to_vec(), b.encode_to_vec());
    }
}
