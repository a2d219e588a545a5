//! 64-bit symbols and the name cache.
//!
//! The wire protocol identifies message types, regions, levels and game modes
//! by signed 64-bit symbols rather than strings. Message-type symbols are
//! derived deterministically from the type name (FNV-1a over the lowercased
//! name), so both ends agree without coordination. Game-asset symbols come
//! from a JSON cache loaded once at startup; the cache is a bijection and is
//! read-only for the rest of the process lifetime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// A signed 64-bit symbol naming a known string.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Symbol(pub i64);

impl Symbol {
    /// Derives the symbol for a name: 64-bit FNV-1a over the lowercased name.
    ///
    /// Symbol derivation is case-insensitive so "mpl_arena_a" and
    /// "MPL_Arena_A" resolve identically.
    pub fn of(name: &str) -> Self {
        let mut hash = FNV_OFFSET;
        for byte in name.bytes() {
            hash ^= byte.to_ascii_lowercase() as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        Symbol(hash as i64)
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:016X}", self.0 as u64)
    }
}

/// Bidirectional mapping between symbols and their textual names.
///
/// Loaded once at startup; lookups are O(1) in both directions.
#[derive(Debug, Default)]
pub struct SymbolCache {
    by_name: HashMap<String, Symbol>,
    by_symbol: HashMap<Symbol, String>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the cache from a JSON object of `name -> symbol` entries.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let entries: HashMap<String, i64> = serde_json::from_str(&content)?;

        let mut cache = Self::new();
        for (name, value) in entries {
            cache.insert(&name, Symbol(value));
        }
        info!("📖 Loaded {} symbols from {}", cache.len(), path.display());
        Ok(cache)
    }

    /// Inserts an entry, keeping the mapping a bijection.
    ///
    /// A name that collides with an existing entry (either direction)
    /// replaces it in both indexes.
    pub fn insert(&mut self, name: &str, symbol: Symbol) {
        let name = name.to_ascii_lowercase();
        if let Some(old) = self.by_name.insert(name.clone(), symbol) {
            self.by_symbol.remove(&old);
        }
        if let Some(old_name) = self.by_symbol.insert(symbol, name) {
            self.by_name.remove(&old_name);
        }
    }

    /// Resolves a name to its cached symbol. Unknown names are absent.
    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    /// Resolves a name via the cache, falling back to derivation.
    pub fn resolve_or_derive(&self, name: &str) -> Symbol {
        self.resolve(name).unwrap_or_else(|| Symbol::of(name))
    }

    /// Looks a symbol back up to its name.
    pub fn name_of(&self, symbol: Symbol) -> Option<&str> {
        self.by_symbol.get(&symbol).map(String::as_str)
    }

    pub fn contains(&self, symbol: Symbol) -> bool {
        self.by_symbol.contains_key(&symbol)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
