// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for the mapping menu
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: menu flows against a recording fake and against a host soft-MMU
//!
//! TEST_SCENARIOS:
//!   - add/remove/write/read flows print the expected prompts and rejections
//!   - write then read round-trips through a `SparsePhys`-backed address space
//!   - any printable choice line parses without panicking

use std::collections::BTreeMap;

use mmuctl::{parse_hex_choice, MappingApi, Menu, MenuError, BANNER};
use proptest::prelude::*;
use softmmu::{AddressSpace, AddressSpaceError, MapError, MmuConfig, MmuContext, SparsePhys, TranslatingRegion};

const ADDR: u64 = 0x1000_2000_0000;

/// Records every call and stores pages in a map.
#[derive(Default)]
struct FakeApi {
    pages: BTreeMap<u64, Vec<u8>>,
    calls: Vec<String>,
}

impl MappingApi for FakeApi {
    fn is_full(&self) -> bool {
        self.pages.len() >= 2
    }

    fn validate_register(&self, addr: u64) -> Result<u64, MapError> {
        if addr & 0xfff != 0 {
            return Err(MapError::Unaligned);
        }
        if self.pages.contains_key(&addr) {
            return Err(MapError::Duplicate);
        }
        Ok(addr)
    }

    fn register(&mut self, addr: u64, prot: u64) -> Result<u64, AddressSpaceError> {
        self.validate_register(addr)?;
        if prot > 3 {
            return Err(MapError::InvalidProtection.into());
        }
        self.calls.push(format!("register {addr:#x} {prot}"));
        self.pages.insert(addr, vec![0; 0x1000]);
        Ok(addr)
    }

    fn unregister(&mut self, addr: u64) -> Result<(), AddressSpaceError> {
        self.pages.remove(&addr).ok_or(MapError::NotRegistered)?;
        self.calls.push(format!("unregister {addr:#x}"));
        Ok(())
    }

    fn is_registered(&self, addr: u64) -> bool {
        self.pages.contains_key(&addr)
    }

    fn validate_write(&self, _addr: u64, len: u64) -> Result<(), MapError> {
        if len > 0x1000 {
            return Err(MapError::TooLong);
        }
        if len % 8 != 0 {
            return Err(MapError::NotWordMultiple);
        }
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), AddressSpaceError> {
        self.calls.push(format!("write {addr:#x} {}", data.len()));
        let page = self.pages.get_mut(&addr).ok_or(MapError::NotRegistered)?;
        page[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn validate_read(&self, _addr: u64, len: u64) -> Result<(), MapError> {
        if len > 0x1000 {
            return Err(MapError::TooLong);
        }
        Ok(())
    }

    fn read(&mut self, addr: u64, len: u64) -> Result<Vec<u8>, AddressSpaceError> {
        let page = self.pages.get(&addr).ok_or(MapError::NotRegistered)?;
        Ok(page[..len as usize].to_vec())
    }
}

fn drive(api: &mut impl MappingApi, input: &[u8]) -> (Result<(), MenuError>, String) {
    let mut menu = Menu::new(input, Vec::new());
    let result = menu.run(api);
    (result, String::from_utf8_lossy(&menu.into_output()).into_owned())
}

#[test]
fn done_ends_the_menu() {
    let (result, out) = drive(&mut FakeApi::default(), b"5\n");
    assert!(result.is_ok());
    assert_eq!(out, format!("{BANNER}# "));
}

#[test]
fn closed_input_is_reported() {
    let (result, _) = drive(&mut FakeApi::default(), b"");
    assert!(matches!(result, Err(MenuError::InputClosed)));
}

#[test]
fn unknown_choice_is_reported() {
    let (_, out) = drive(&mut FakeApi::default(), b"9\n5\n");
    assert!(out.contains("unknown choice\n"));
}

#[test]
fn add_prompts_for_address_then_permissions() {
    let mut api = FakeApi::default();
    let (result, out) = drive(&mut api, b"1\n100020000000\n103\n5\n");
    assert!(result.is_ok());
    assert!(out.contains("addr?\n# permissions:\n\t0 = PROT_NONE\n"));
    // 0x103 truncates to 3
    assert_eq!(api.calls, vec![format!("register {ADDR:#x} 3")]);
}

#[test]
fn add_rejections_skip_the_permission_prompt() {
    let mut api = FakeApi::default();
    let (_, out) = drive(&mut api, b"1\n100020000008\n5\n");
    assert!(out.contains("address is malformed\n"));
    assert!(!out.contains("permissions:"));

    api.pages.insert(1, Vec::new());
    api.pages.insert(2, Vec::new());
    let (_, out) = drive(&mut api, b"1\n5\n");
    assert!(out.contains("too many active allocations\n"));
    assert!(!out.contains("addr?"));
}

#[test]
fn remove_unknown_address_is_reported() {
    let (_, out) = drive(&mut FakeApi::default(), b"2\n100020000000\n5\n");
    assert!(out.contains("address is not present\n"));
}

#[test]
fn short_write_is_zero_filled_to_a_whole_word() {
    let mut api = FakeApi::default();
    let input = b"1\n100020000000\n3\n3\n100020000000\n10\nABCDEFGHIJ";
    let (result, out) = drive(&mut api, input);
    // input ran dry inside the data; the next choice finds nothing
    assert!(matches!(result, Err(MenuError::InputClosed)));
    assert!(out.contains("nbytes (hex)?\n# data> # "));
    assert_eq!(api.calls.last().map(String::as_str), Some("write 0x100020000000 16"));
    assert_eq!(&api.pages[&ADDR][..16], b"ABCDEFGHIJ\0\0\0\0\0\0");
}

#[test]
fn write_length_is_validated_before_data() {
    let mut api = FakeApi::default();
    let (_, out) = drive(&mut api, b"1\n100020000000\n3\n3\n100020000000\n c\n5\n");
    assert!(out.contains("data must be multiple of 8\n"));
    assert!(!out.contains("data> "));
    let (_, out) = drive(&mut api, b"3\n100020000000\n1008\n5\n");
    assert!(out.contains("too long, sorry\n"));
}

#[test]
fn read_prints_raw_bytes_after_marker() {
    let mut api = FakeApi::default();
    api.pages.insert(ADDR, b"hello, world".iter().copied().chain(std::iter::repeat(0)).take(0x1000).collect());
    let (_, out) = drive(&mut api, b"4\n100020000000\n5\n5\n");
    assert!(out.contains("data follows newline\nhello"));
}

#[test]
fn round_trip_through_host_soft_mmu() {
    let ctx = MmuContext::new(SparsePhys::new(), MmuConfig::default());
    let mut space = AddressSpace::new(&ctx, TranslatingRegion::new(&ctx));
    let mut input = b"1\n100020000000\n3\n3\n100020000000\n8\n".to_vec();
    input.extend_from_slice(&0x1122_3344_5566_7788u64.to_ne_bytes());
    input.extend_from_slice(b"4\n100020000000\n8\n5\n");
    let mut menu = Menu::new(&input[..], Vec::new());
    menu.run(&mut space).unwrap();
    let out = menu.into_output();
    let marker = b"data follows newline\n";
    let at = out.windows(marker.len()).position(|w| w == marker).expect("read output") + marker.len();
    assert_eq!(&out[at..at + 8], &0x1122_3344_5566_7788u64.to_ne_bytes());
}

proptest! {
    #[test]
    fn any_choice_line_parses(line in "[ -~]{0,16}") {
        let _ = parse_hex_choice(line.as_bytes());
    }

    #[test]
    fn hex_numbers_parse_back(value in 0u64..=i64::MAX as u64) {
        prop_assert_eq!(parse_hex_choice(format!("{value:x}\n").as_bytes()), value);
        prop_assert_eq!(parse_hex_choice(format!("0x{value:X}").as_bytes()), value);
    }
}
