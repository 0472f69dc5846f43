// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Line-oriented mapping menu.
//!
//! Choices are hex numbers read byte by byte; payloads are raw bytes. Rejected
//! requests print their reason and the menu carries on.

use std::io::{self, Read, Write};

use log::debug;
use softmmu::{AddressSpace, AddressSpaceError, FatalError, MapError, PhysMemory, RegionAccess, PAGE_SIZE};
use thiserror::Error;

/// Longest choice line read, newline included.
const CHOICE_LEN: usize = 0x10;

/// Banner printed before every choice.
pub const BANNER: &str = "=== cache ===\n\
resolving pages since 1996\n\
using our new PageRank algorithm!\n\
1. add some page\n\
2. remove some page\n\
3. write some page\n\
4. read some page\n\
5. done\n";

const PERMISSIONS: &str = "permissions:\n\
\t0 = PROT_NONE\n\
\t1 = PROT_READ\n\
\t2 = PROT_WRITE\n\
\t3 = PROT_READ | PROT_WRITE\n";

/// Errors that end the menu.
#[derive(Debug, Error)]
pub enum MenuError {
    /// Nothing could be read where a choice was expected.
    #[error("input closed")]
    InputClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// What the menu needs from an address space.
pub trait MappingApi {
    fn is_full(&self) -> bool;
    fn validate_register(&self, addr: u64) -> Result<u64, MapError>;
    fn register(&mut self, addr: u64, prot: u64) -> Result<u64, AddressSpaceError>;
    fn unregister(&mut self, addr: u64) -> Result<(), AddressSpaceError>;
    fn is_registered(&self, addr: u64) -> bool;
    fn validate_write(&self, addr: u64, len: u64) -> Result<(), MapError>;
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), AddressSpaceError>;
    fn validate_read(&self, addr: u64, len: u64) -> Result<(), MapError>;
    fn read(&mut self, addr: u64, len: u64) -> Result<Vec<u8>, AddressSpaceError>;
}

impl<M: PhysMemory, R: RegionAccess> MappingApi for AddressSpace<'_, M, R> {
    fn is_full(&self) -> bool {
        AddressSpace::is_full(self)
    }

    fn validate_register(&self, addr: u64) -> Result<u64, MapError> {
        AddressSpace::validate_register(self, addr)
    }

    fn register(&mut self, addr: u64, prot: u64) -> Result<u64, AddressSpaceError> {
        AddressSpace::register(self, addr, prot)
    }

    fn unregister(&mut self, addr: u64) -> Result<(), AddressSpaceError> {
        AddressSpace::unregister(self, addr)
    }

    fn is_registered(&self, addr: u64) -> bool {
        AddressSpace::is_registered(self, addr)
    }

    fn validate_write(&self, addr: u64, len: u64) -> Result<(), MapError> {
        AddressSpace::validate_write(self, addr, len)
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), AddressSpaceError> {
        AddressSpace::write(self, addr, data)
    }

    fn validate_read(&self, addr: u64, len: u64) -> Result<(), MapError> {
        AddressSpace::validate_read(self, addr, len)
    }

    fn read(&mut self, addr: u64, len: u64) -> Result<Vec<u8>, AddressSpaceError> {
        AddressSpace::read(self, addr, len)
    }
}

/// Parses a choice the way `strtol(buf, NULL, 16)` would and reinterprets
/// the result as unsigned. Out-of-range values saturate to the `i64` bounds.
pub fn parse_hex_choice(buf: &[u8]) -> u64 {
    let mut rest = buf;
    while let [b' ' | b'\t' | b'\n' | b'\x0b' | b'\x0c' | b'\r', tail @ ..] = rest {
        rest = tail;
    }
    let negative = match rest {
        [b'-', tail @ ..] => {
            rest = tail;
            true
        }
        [b'+', tail @ ..] => {
            rest = tail;
            false
        }
        _ => false,
    };
    if let [b'0', b'x' | b'X', next, ..] = rest {
        if next.is_ascii_hexdigit() {
            rest = &rest[2..];
        }
    }
    let mut value: i128 = 0;
    for byte in rest {
        let Some(digit) = (*byte as char).to_digit(16) else { break };
        value = (value * 16 + i128::from(digit)).min(i128::from(i64::MAX) + 1);
    }
    let signed = if negative { (-value).max(i128::from(i64::MIN)) } else { value.min(i128::from(i64::MAX)) };
    signed as i64 as u64
}

/// Menu driver over a byte source and a console.
pub struct Menu<I: Read, O: Write> {
    input: I,
    output: O,
}

impl<I: Read, O: Write> Menu<I, O> {
    pub fn new(input: I, output: O) -> Self {
        Self { input, output }
    }

    /// Gives back the console, e.g. to inspect what was printed.
    pub fn into_output(self) -> O {
        self.output
    }

    fn say(&mut self, text: &str) -> Result<(), MenuError> {
        self.output.write_all(text.as_bytes())?;
        self.output.flush()?;
        Ok(())
    }

    fn reject(&mut self, err: MapError) -> Result<(), MenuError> {
        debug!("menu: rejected: {err:?}");
        self.say(&format!("{err}\n"))
    }

    /// Handles an API result: rejections are printed, fatal errors end the menu.
    fn settle<T>(&mut self, result: Result<T, AddressSpaceError>) -> Result<Option<T>, MenuError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(AddressSpaceError::Rejected(err)) => self.reject(err).map(|()| None),
            Err(AddressSpaceError::Fatal(err)) => Err(err.into()),
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>, MenuError> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return Ok(None),
            }
        }
    }

    /// Prompts and reads one hex choice. Input that yields nothing at all
    /// ends the menu.
    pub fn read_choice(&mut self) -> Result<u64, MenuError> {
        self.say("# ")?;
        let mut buf = [0u8; CHOICE_LEN];
        for slot in buf.iter_mut() {
            let Some(byte) = self.read_byte()? else { break };
            *slot = byte;
            if byte == b'\n' {
                break;
            }
        }
        if buf[0] == 0 {
            return Err(MenuError::InputClosed);
        }
        Ok(parse_hex_choice(&buf))
    }

    /// Prompts and reads up to `len` raw bytes; the buffer is zero-filled past
    /// what arrived. Returns the buffer and the number of bytes read.
    fn read_data(&mut self, len: usize) -> Result<(Vec<u8>, usize), MenuError> {
        self.say("# ")?;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let Some(byte) = self.read_byte()? else { break };
            buf[read] = byte;
            read += 1;
        }
        Ok((buf, read))
    }

    /// Runs the menu until `done` is chosen.
    pub fn run(&mut self, api: &mut impl MappingApi) -> Result<(), MenuError> {
        loop {
            self.say(BANNER)?;
            match self.read_choice()? {
                1 => self.add_page(api)?,
                2 => self.remove_page(api)?,
                3 => self.write_page(api)?,
                4 => self.read_page(api)?,
                5 => return Ok(()),
                _ => self.say("unknown choice\n")?,
            }
        }
    }

    fn add_page(&mut self, api: &mut impl MappingApi) -> Result<(), MenuError> {
        if api.is_full() {
            return self.reject(MapError::TooManyMappings);
        }
        self.say("addr?\n")?;
        let addr = self.read_choice()?;
        if let Err(err) = api.validate_register(addr) {
            return self.reject(err);
        }
        self.say(PERMISSIONS)?;
        let prot = u64::from(self.read_choice()? as u8);
        if let Some(mapped) = self.settle(api.register(addr, prot))? {
            debug!("menu: mapped {mapped:#x}");
        }
        Ok(())
    }

    fn remove_page(&mut self, api: &mut impl MappingApi) -> Result<(), MenuError> {
        self.say("addr?\n")?;
        let addr = self.read_choice()?;
        self.settle(api.unregister(addr))?;
        Ok(())
    }

    fn write_page(&mut self, api: &mut impl MappingApi) -> Result<(), MenuError> {
        self.say("addr?\n")?;
        let addr = self.read_choice()?;
        if !api.is_registered(addr) {
            return self.reject(MapError::NotRegistered);
        }
        self.say("nbytes (hex)?\n")?;
        let len = u64::from(self.read_choice()? as u32);
        if let Err(err) = api.validate_write(addr, len) {
            return self.reject(err);
        }
        self.say("data> ")?;
        let (mut data, read) = self.read_data(len as usize)?;
        data.truncate(read.next_multiple_of(8));
        self.settle(api.write(addr, &data))?;
        Ok(())
    }

    fn read_page(&mut self, api: &mut impl MappingApi) -> Result<(), MenuError> {
        self.say("addr?\n")?;
        let addr = self.read_choice()?;
        if !api.is_registered(addr) {
            return self.reject(MapError::NotRegistered);
        }
        if let Err(err) = api.validate_read(addr, PAGE_SIZE) {
            return self.reject(err);
        }
        self.say("nbytes (hex)?\n")?;
        let len = u64::from(self.read_choice()? as u32);
        if let Err(err) = api.validate_read(addr, len) {
            return self.reject(err);
        }
        if let Some(data) = self.settle(api.read(addr, len))? {
            self.say("data follows newline\n")?;
            self.output.write_all(&data)?;
            self.output.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_like_strtol() {
        assert_eq!(parse_hex_choice(b"1\n"), 1);
        assert_eq!(parse_hex_choice(b"  0x1f zz"), 0x1f);
        assert_eq!(parse_hex_choice(b"DeadBeef"), 0xdead_beef);
        assert_eq!(parse_hex_choice(b"zz"), 0);
        assert_eq!(parse_hex_choice(b"0x"), 0);
        assert_eq!(parse_hex_choice(b"-1"), u64::MAX);
        assert_eq!(parse_hex_choice(b"+10"), 0x10);
        assert_eq!(parse_hex_choice(b"ffffffffffffffffff"), i64::MAX as u64);
        assert_eq!(parse_hex_choice(b"-ffffffffffffffffff"), i64::MIN as u64);
        assert_eq!(parse_hex_choice(b"100001000\0\0\0"), 0x1_0000_1000);
    }

    #[test]
    fn closed_input_ends_the_menu() {
        let mut menu = Menu::new(&b""[..], Vec::new());
        assert!(matches!(menu.read_choice(), Err(MenuError::InputClosed)));
        let mut menu = Menu::new(&b"\0\n"[..], Vec::new());
        assert!(matches!(menu.read_choice(), Err(MenuError::InputClosed)));
    }

    #[test]
    fn choice_reads_stop_at_newline() {
        let mut menu = Menu::new(&b"4\n5\n"[..], Vec::new());
        assert_eq!(menu.read_choice().unwrap(), 4);
        assert_eq!(menu.read_choice().unwrap(), 5);
        assert_eq!(menu.into_output(), b"# # ");
    }
}
