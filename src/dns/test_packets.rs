//! Captured-style packets shared by the unit tests

use crate::dns::buffer::VectorPacketBuffer;
use crate::dns::protocol::{DnsHeader, DnsQuestion, QueryType};

/// A recursion-desired query for a single question
pub fn query(id: u16, name: &str, qtype: QueryType) -> Vec<u8> {
    let mut header = DnsHeader::new();
    header.id = id;
    header.recursion_desired = true;
    header.questions = 1;

    let mut buffer = VectorPacketBuffer::new();
    header.write(&mut buffer).unwrap();
    DnsQuestion::new(name.to_string(), qtype)
        .write(&mut buffer)
        .unwrap();

    buffer.into_inner()
}

/// example.com A, one answer with a 300 second TTL
pub fn a_response() -> Vec<u8> {
    vec![
        0x12, 0x34, // id
        0x81, 0x80, // flags
        0x00, 0x01, // questions
        0x00, 0x01, // answers
        0x00, 0x00, // authority
        0x00, 0x00, // additional
        //
        0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', //
        0x03, b'c', b'o', b'm', 0x00, //
        0x00, 0x01, // type A
        0x00, 0x01, // class IN
        //
        0xC0, 0x0C, // name -> example.com
        0x00, 0x01, // type A
        0x00, 0x01, // class IN
        0x00, 0x00, 0x01, 0x2C, // ttl 300
        0x00, 0x04, // rdlength
        93, 184, 216, 34,
    ]
}

/// `a_response` with a NS record in authority and an EDNS OPT record
///
/// Mirrors what a resolver sends back to a client that asked with EDNS.
pub fn a_response_with_opt() -> Vec<u8> {
    let mut data = a_response();
    data[9] = 0x01; // authority
    data[11] = 0x01; // additional
    data.extend_from_slice(&[
        0xC0, 0x0C, 0x00, 0x02, 0x00, 0x01, // example.com NS IN
        0x00, 0x00, 0x0E, 0x10, // ttl 3600
        0x00, 0x06, //
        0x03, b'n', b's', b'1', 0xC0, 0x0C, //
        //
        0x00, // root
        0x00, 0x29, // type OPT
        0x10, 0x00, // udp payload size 4096
        0x00, 0x00, 0x00, 0x00, // extended rcode and flags
        0x00, 0x00, // rdlength
    ]);
    data
}

/// www.example.com CNAME edge.example.com, TTL 3600
pub fn cname_response() -> Vec<u8> {
    vec![
        0x56, 0x78, // id
        0x81, 0x80, // flags
        0x00, 0x01, // questions
        0x00, 0x01, // answers
        0x00, 0x00, // authority
        0x00, 0x00, // additional
        //
        0x03, b'w', b'w', b'w', //
        0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', //
        0x03, b'c', b'o', b'm', 0x00, //
        0x00, 0x05, // type CNAME
        0x00, 0x01, // class IN
        //
        0xC0, 0x0C, // name -> www.example.com
        0x00, 0x05, // type CNAME
        0x00, 0x01, // class IN
        0x00, 0x00, 0x0E, 0x10, // ttl 3600
        0x00, 0x07, // rdlength
        0x04, b'e', b'd', b'g', b'e', 0xC0, 0x10, // edge + -> example.com
    ]
}

/// example.com NS with two nameservers and their glue
///
/// The additional section carries A glue for ns1 and ns2 in the same order
/// as the answers, followed by an AAAA record for ns1.
pub fn ns_response() -> Vec<u8> {
    vec![
        0x11, 0x11, // id
        0x81, 0x80, // flags
        0x00, 0x01, // questions
        0x00, 0x02, // answers
        0x00, 0x00, // authority
        0x00, 0x03, // additional
        //
        0x07, b'e', b'x', b'a', b'm', b'p', b'l', b'e', //
        0x03, b'c', b'o', b'm', 0x00, //
        0x00, 0x02, // type NS
        0x00, 0x01, // class IN
        // offset 29
        0xC0, 0x0C, 0x00, 0x02, 0x00, 0x01, //
        0x00, 0x02, 0xA3, 0x00, // ttl 172800
        0x00, 0x06, //
        0x03, b'n', b's', b'1', 0xC0, 0x0C, // offset 41: ns1.example.com
        // offset 47
        0xC0, 0x0C, 0x00, 0x02, 0x00, 0x01, //
        0x00, 0x02, 0xA3, 0x00, //
        0x00, 0x06, //
        0x03, b'n', b's', b'2', 0xC0, 0x0C, // offset 59: ns2.example.com
        // offset 65
        0xC0, 0x29, 0x00, 0x01, 0x00, 0x01, //
        0x00, 0x02, 0xA3, 0x00, //
        0x00, 0x04, 10, 0, 0, 1,
        // offset 81
        0xC0, 0x3B, 0x00, 0x01, 0x00, 0x01, //
        0x00, 0x02, 0xA3, 0x00, //
        0x00, 0x04, 10, 0, 0, 2,
        // offset 97
        0xC0, 0x29, 0x00, 0x1C, 0x00, 0x01, //
        0x00, 0x02, 0xA3, 0x00, //
        0x00, 0x10, //
        0x20, 0x01, 0x0D, 0xB8, 0x00, 0x00, 0x00, 0x00, //
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
    ]
}
