//! Symbol information for the traced executable.
//!
//! The engine does not parse object files itself; it consumes a symbol
//! listing (`nm`-style `addr [size] name` lines) and answers the two lookups
//! navigation needs: name to address, and address to enclosing symbol.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::disk::Addr;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub addr: Addr,
    pub size: u64,
}

/// Loaded symbol table.
pub struct Image {
    /// Sorted by address.
    by_addr: Vec<Symbol>,
    by_name: HashMap<String, usize>,
}

impl Image {
    pub fn new(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.addr);
        let by_name = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self {
            by_addr: symbols,
            by_name,
        }
    }

    /// Load `addr [size] name` lines. Addresses and sizes are hex; blank
    /// lines and `#` comments are ignored.
    pub fn from_symbol_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut symbols = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let parsed = match fields.as_slice() {
                [addr, name] => u64::from_str_radix(addr, 16)
                    .ok()
                    .map(|addr| (addr, 0, *name)),
                [addr, size, name] => u64::from_str_radix(addr, 16).ok().and_then(|addr| {
                    u64::from_str_radix(size, 16).ok().map(|size| (addr, size, *name))
                }),
                _ => None,
            };
            if let Some((addr, size, name)) = parsed {
                symbols.push(Symbol {
                    name: name.to_string(),
                    addr,
                    size,
                });
            }
        }
        Ok(Self::new(symbols))
    }

    pub fn lookup_symbol(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name).map(|&i| &self.by_addr[i])
    }

    /// The symbol whose extent contains `addr`. A size of zero is treated
    /// as extending to the next symbol.
    pub fn find_containing(&self, addr: Addr) -> Option<&Symbol> {
        let i = self.by_addr.partition_point(|s| s.addr <= addr);
        if i == 0 {
            return None;
        }
        let sym = &self.by_addr[i - 1];
        let end = if sym.size > 0 {
            sym.addr + sym.size
        } else {
            self.by_addr
                .get(i)
                .map(|next| next.addr)
                .unwrap_or(Addr::MAX)
        };
        (addr < end).then_some(sym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        Image::new(vec![
            Symbol {
                name: "main".into(),
                addr: 0x8000,
                size: 0x40,
            },
            Symbol {
                name: "helper".into(),
                addr: 0x8040,
                size: 0,
            },
            Symbol {
                name: "tail".into(),
                addr: 0x9000,
                size: 0x10,
            },
        ])
    }

    #[test]
    fn name_lookup() {
        let img = image();
        assert_eq!(img.lookup_symbol("main").unwrap().addr, 0x8000);
        assert!(img.lookup_symbol("absent").is_none());
    }

    #[test]
    fn containment_with_and_without_sizes() {
        let img = image();
        assert_eq!(img.find_containing(0x8000).unwrap().name, "main");
        assert_eq!(img.find_containing(0x803f).unwrap().name, "main");
        // Zero-size symbol extends to the next one.
        assert_eq!(img.find_containing(0x8040).unwrap().name, "helper");
        assert_eq!(img.find_containing(0x8fff).unwrap().name, "helper");
        assert_eq!(img.find_containing(0x9008).unwrap().name, "tail");
        assert!(img.find_containing(0x9010).is_none());
        assert!(img.find_containing(0x7fff).is_none());
    }
}
