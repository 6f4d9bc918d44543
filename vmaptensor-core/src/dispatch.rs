use std::fmt;

/// Tags a tensor implementation carries so routing code can pick kernels
/// without inspecting the implementation itself.
///
/// Keys are ordered by priority: a later variant outranks an earlier one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DispatchKey {
    Cpu = 0,
    Batched = 1,
}

impl DispatchKey {
    const ALL: [DispatchKey; 2] = [DispatchKey::Cpu, DispatchKey::Batched];

    fn bit(self) -> u64 {
        1 << (self as u8)
    }
}

/// A set of [`DispatchKey`]s stored as a bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DispatchKeySet(u64);

impl DispatchKeySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn has(&self, key: DispatchKey) -> bool {
        self.0 & key.bit() != 0
    }

    #[must_use]
    pub fn add(self, key: DispatchKey) -> Self {
        Self(self.0 | key.bit())
    }

    #[must_use]
    pub fn remove(self, key: DispatchKey) -> Self {
        Self(self.0 & !key.bit())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The key a dispatcher should route on, if any.
    pub fn highest_priority_key(&self) -> Option<DispatchKey> {
        self.iter().last()
    }

    /// Keys in ascending priority.
    pub fn iter(&self) -> impl Iterator<Item = DispatchKey> + '_ {
        DispatchKey::ALL.into_iter().filter(|k| self.has(*k))
    }
}

impl From<DispatchKey> for DispatchKeySet {
    fn from(key: DispatchKey) -> Self {
        Self::empty().add(key)
    }
}

impl fmt::Debug for DispatchKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
