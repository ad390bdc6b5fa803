//! Property-based tests for the wire codec using proptest

use proptest::prelude::*;

use dnsrelay::dns::buffer::VectorPacketBuffer;
use dnsrelay::dns::cache::CacheKey;
use dnsrelay::dns::protocol::{
    build_response, decode_question, AddressRecord, DnsHeader, DnsMessage, DnsQuestion,
    QueryType, ResponseCounts, CLASS_IN, HEADER_LEN,
};
use std::net::Ipv4Addr;

// Strategy for generating valid domain names
fn domain_name_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z][a-zA-Z0-9-]{0,30}", 1..5).prop_map(|parts| parts.join("."))
}

// Strategy for wire labels made of arbitrary bytes
fn raw_labels_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..=63), 1..5)
}

fn qtype_strategy() -> impl Strategy<Value = QueryType> {
    prop_oneof![
        Just(QueryType::A),
        Just(QueryType::Ns),
        Just(QueryType::Cname),
        Just(QueryType::Ptr),
        Just(QueryType::Aaaa),
        any::<u16>().prop_map(QueryType::from_num),
    ]
}

fn ipv4_strategy() -> impl Strategy<Value = Ipv4Addr> {
    any::<[u8; 4]>().prop_map(Ipv4Addr::from)
}

fn encode_query(id: u16, question: &DnsQuestion) -> Vec<u8> {
    let mut header = DnsHeader::new();
    header.id = id;
    header.questions = 1;

    let mut buffer = VectorPacketBuffer::new();
    header.write(&mut buffer).unwrap();
    question.write(&mut buffer).unwrap();
    buffer.into_inner()
}

/// A query whose question is written label by label
fn encode_raw_query(labels: &[Vec<u8>], qtype: u16) -> Vec<u8> {
    let mut data = vec![0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
    for label in labels {
        data.push(label.len() as u8);
        data.extend_from_slice(label);
    }
    data.push(0);
    data.extend_from_slice(&qtype.to_be_bytes());
    data.extend_from_slice(&CLASS_IN.to_be_bytes());
    data
}

proptest! {
    #[test]
    fn test_question_reencodes_byte_identical(
        id in any::<u16>(),
        name in domain_name_strategy(),
        qtype in qtype_strategy()
    ) {
        let query = encode_query(id, &DnsQuestion::new(name.clone(), qtype));

        let (question, end) = decode_question(&query).unwrap();
        prop_assert_eq!(&name, &question.name);
        prop_assert_eq!(qtype, question.qtype);
        prop_assert_eq!(query.len(), end);

        let mut buffer = VectorPacketBuffer::new();
        question.write(&mut buffer).unwrap();
        prop_assert_eq!(&query[HEADER_LEN..], &buffer.buffer[..]);
    }

    #[test]
    fn test_raw_label_question_reencodes_byte_identical(
        labels in raw_labels_strategy(),
        qtype in any::<u16>()
    ) {
        let query = encode_raw_query(&labels, qtype);

        let (question, end) = decode_question(&query).unwrap();
        prop_assert_eq!(query.len(), end);

        let mut buffer = VectorPacketBuffer::new();
        question.write(&mut buffer).unwrap();
        prop_assert_eq!(&query[HEADER_LEN..], &buffer.buffer[..]);
    }

    #[test]
    fn test_distinct_wire_names_decode_apart(
        first in raw_labels_strategy(),
        second in raw_labels_strategy()
    ) {
        prop_assume!(first != second);

        let (a, _) = decode_question(&encode_raw_query(&first, 1)).unwrap();
        let (b, _) = decode_question(&encode_raw_query(&second, 1)).unwrap();
        prop_assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = decode_question(&data);
        let _ = DnsMessage::parse(&data);
    }

    #[test]
    fn test_cached_reply_carries_record(
        id in any::<u16>(),
        name in domain_name_strategy(),
        addr in ipv4_strategy(),
        ttl in any::<u32>()
    ) {
        let question = DnsQuestion::new(name.clone(), QueryType::A);
        let block = AddressRecord { domain: name.clone(), addr, class: CLASS_IN, ttl }
            .to_bytes()
            .unwrap();
        let counts = ResponseCounts { answers: 1, additional: 0 };

        let query = encode_query(id, &question);
        let reply = build_response(id, &query[HEADER_LEN..], counts, &[block]).unwrap();
        let message = DnsMessage::parse(&reply).unwrap();

        prop_assert_eq!(id, message.header.id);
        prop_assert_eq!(1, message.records.len());
        prop_assert_eq!(name.to_lowercase(), message.records[0].domain.to_lowercase());
        prop_assert_eq!(ttl, message.records[0].ttl);
        prop_assert_eq!(Some(addr), message.address(&message.records[0]));
    }

    #[test]
    fn test_key_ignores_case(name in domain_name_strategy()) {
        let upper = CacheKey::new(&name.to_uppercase(), QueryType::A, CLASS_IN);
        let lower = CacheKey::new(&name.to_lowercase(), QueryType::A, CLASS_IN);
        prop_assert_eq!(upper, lower);
    }
}
