//! Property tests for the symbol table, record encoding and the
//! page-local sort.

use proptest::collection::vec;
use proptest::prelude::*;

use tickstore::sort::sort_page_slots;
use tickstore::{Endianness, Record, RecordHeader, RecordKind, SubSecond, SymbolTable};

fn symbol_name() -> impl Strategy<Value = String> {
    // Instrument-ish names: dotted uppercase segments plus the odd
    // digit, 1..=12 bytes.
    proptest::string::string_regex("[A-Z0-9]{1,4}(\\.[A-Z0-9]{1,4}){0,2}").unwrap()
}

proptest! {
    #[test]
    fn resolve_is_idempotent_and_bijective(names in vec(symbol_name(), 1..64)) {
        let mut table = SymbolTable::new();
        let mut assigned: Vec<(String, u16)> = Vec::new();
        for name in &names {
            let idx = table.resolve(name).unwrap();
            prop_assert!(idx >= 1);
            prop_assert_eq!(table.resolve(name).unwrap(), idx);
            prop_assert_eq!(table.name(idx), Some(name.as_str()));
            assigned.push((name.clone(), idx));
        }
        // Distinct names get distinct indices.
        for (a, ai) in &assigned {
            for (b, bi) in &assigned {
                if ai != bi {
                    prop_assert_ne!(a, b);
                } else {
                    prop_assert_eq!(a, b);
                }
            }
        }
    }

    #[test]
    fn symtab_serialization_roundtrips(names in vec(symbol_name(), 1..48)) {
        let mut table = SymbolTable::new();
        for name in &names {
            table.resolve(name).unwrap();
        }
        for endian in [Endianness::Little, Endianness::Big] {
            let mut buf = Vec::new();
            table.write_to(&mut buf, endian).unwrap();
            let (parsed, consumed) = SymbolTable::from_bytes(&buf, endian).unwrap();
            prop_assert_eq!(consumed, buf.len());
            prop_assert_eq!(parsed.len(), table.len());
            for name in &names {
                prop_assert_eq!(parsed.get(name), table.get(name));
            }
        }
    }

    #[test]
    fn header_fields_roundtrip(
        seconds in any::<u32>(),
        ms in 0u16..1020,
        symbol in any::<u16>(),
        kind_tag in 0u8..12,
    ) {
        let kind = RecordKind::from_u8(kind_tag).unwrap();
        let header = RecordHeader::new(seconds, SubSecond::Millis(ms), symbol, kind);
        prop_assert_eq!(header.seconds(), seconds);
        prop_assert_eq!(header.subsec(), SubSecond::Millis(ms));
        prop_assert_eq!(header.symbol(), symbol);
        prop_assert_eq!(header.kind(), Some(kind));
        prop_assert_eq!(header.slot_count().unwrap(), kind.slot_count());
    }

    #[test]
    fn tick_encoding_roundtrips(
        seconds in any::<u32>(),
        ms in 0u16..1020,
        symbol in any::<u16>(),
        price in any::<f32>().prop_filter("finite", |p| p.is_finite()),
        size in any::<u32>(),
    ) {
        let rec = Record::tick(RecordKind::Trade, seconds, SubSecond::Millis(ms), symbol, price, size).unwrap();
        let mut slots = Vec::new();
        rec.encode_into(&mut slots);
        let decoded = Record::decode(&slots).unwrap();
        prop_assert_eq!(decoded, rec);
    }

    #[test]
    fn local_sort_agrees_with_std_sort(
        seconds in vec(0u32..100_000, 1..300),
    ) {
        let records: Vec<Record> = seconds
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                Record::tick(RecordKind::Trade, s, SubSecond::Millis(0), 1, 1.0, i as u32).unwrap()
            })
            .collect();
        let mut slots = Vec::new();
        for r in &records {
            r.encode_into(&mut slots);
        }
        sort_page_slots(&mut slots);

        let mut expected: Vec<u64> = records.iter().map(|r| r.header.raw()).collect();
        expected.sort_unstable();

        let mut got = Vec::new();
        let mut pos = 0;
        while pos < slots.len() {
            let rec = Record::decode(&slots[pos..]).unwrap();
            got.push(rec.header.raw());
            pos += rec.slot_count();
        }
        prop_assert_eq!(got, expected);
    }
}
