use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KwId(pub u32);

struct Table {
    map: FxHashMap<String, u32>, // text -> id
    rev: Vec<String>,            // id -> text
}

impl Table {
    fn new() -> Self {
        Self { map: FxHashMap::default(), rev: Vec::new() }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.map.get(s) {
            return id;
        }
        let id = self.rev.len() as u32;
        self.rev.push(s.to_owned());
        self.map.insert(self.rev[id as usize].clone(), id);
        id
    }

    fn resolve(&self, id: u32) -> &str {
        &self.rev[id as usize]
    }
}

/// Process-wide intern tables for the two symbol kinds.
///
/// Variables and keywords are interned by name: two reads of the same
/// spelling yield the same id for the lifetime of the process. The
/// mutable binding cells a variable carries live in the evaluator (and
/// are torn down with it by INITIALIZE), so the tables stay `Send` and
/// the ids stay `Copy`.
struct Interner {
    vars: Table,
    kws: Table,
}

impl Interner {
    fn new() -> Self {
        Self { vars: Table::new(), kws: Table::new() }
    }

    fn intern_var(&mut self, s: &str) -> VarId {
        VarId(self.vars.intern(s))
    }

    fn var_name(&self, id: VarId) -> &str {
        self.vars.resolve(id.0)
    }

    // Keywords: store canonical text WITHOUT the leading ':'
    fn intern_kw(&mut self, s: &str) -> KwId {
        let canon = s.strip_prefix(':').unwrap_or(s); // tolerate ":name" input
        KwId(self.kws.intern(canon))
    }

    fn kw_name(&self, id: KwId) -> &str {
        self.kws.resolve(id.0)
    }
}

static INTERNER: Lazy<Mutex<Interner>> = Lazy::new(|| Mutex::new(Interner::new()));

pub fn intern_var(s: &str) -> VarId {
    INTERNER.lock().unwrap().intern_var(s)
}

pub fn var_name(id: VarId) -> String {
    INTERNER.lock().unwrap().var_name(id).to_owned()
}

pub fn intern_kw(s: &str) -> KwId {
    INTERNER.lock().unwrap().intern_kw(s)
}

pub fn kw_name(id: KwId) -> String {
    INTERNER.lock().unwrap().kw_name(id).to_owned()
}

/// Prints a keyword the way it reads: with the leading colon.
pub fn kw_print(id: KwId) -> String {
    format!(":{}", kw_name(id))
}
