use rustc_hash::FxHashMap;

use crate::error::{Error, EvaluatorError};
use crate::interner::{self, VarId};
use crate::value::{Namespace, Value};

/// Index of a frame in the evaluator's arena. The null frame (global
/// bindings) is represented as `None` wherever a chain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub u32);

/// One link of an environment chain: a namespace, a parameter vector and a
/// parallel slot vector, plus the enclosing frame.
#[derive(Debug)]
pub struct Frame {
    pub namespace: Namespace,
    pub vars: Vec<VarId>,
    pub slots: Vec<Value>,
    pub parent: Option<FrameId>,
}

impl Frame {
    /// Position of `var` in this frame's parameter vector, when this
    /// frame's namespace matches.
    pub fn binding_index(&self, namespace: Namespace, var: VarId) -> Option<usize> {
        if self.namespace != namespace {
            return None;
        }
        self.vars.iter().position(|&v| v == var)
    }
}

/// Arena owning every frame created during a session. Frames are never
/// freed individually; INITIALIZE drops the whole evaluator and the arena
/// with it, which is how the host-provided reclamation contract is met.
#[derive(Debug, Default)]
pub struct Frames {
    arena: Vec<Frame>,
}

impl Frames {
    pub fn new() -> Self {
        Self { arena: Vec::new() }
    }

    pub fn alloc(&mut self, frame: Frame) -> FrameId {
        let id = FrameId(self.arena.len() as u32);
        self.arena.push(frame);
        id
    }

    pub fn get(&self, id: FrameId) -> &Frame {
        &self.arena[id.0 as usize]
    }

    fn get_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.arena[id.0 as usize]
    }

    /// Scans the chain from the innermost frame outward; on the null frame
    /// the variable's global cell is consulted.
    pub fn lookup(
        &self,
        env: Option<FrameId>,
        globals: &Globals,
        namespace: Namespace,
        var: VarId,
    ) -> Result<Value, Error> {
        let mut cursor = env;
        while let Some(id) = cursor {
            let frame = self.get(id);
            if let Some(index) = frame.binding_index(namespace, var) {
                return Ok(frame.slots[index].clone());
            }
            cursor = frame.parent;
        }
        globals.get(namespace, var).ok_or_else(|| unbound(namespace, var))
    }

    /// Updates the innermost binding found, else the global cell.
    pub fn assign(
        &mut self,
        env: Option<FrameId>,
        globals: &mut Globals,
        namespace: Namespace,
        var: VarId,
        value: Value,
    ) {
        let mut cursor = env;
        while let Some(id) = cursor {
            let frame = self.get(id);
            if let Some(index) = frame.binding_index(namespace, var) {
                self.get_mut(id).slots[index] = value;
                return;
            }
            cursor = frame.parent;
        }
        globals.set(namespace, var, value);
    }

    /// Writes one slot directly. Used by the stack-based evaluators,
    /// whose dynamic frames are found by walking the control stack rather
    /// than a parent chain.
    pub fn set_slot(&mut self, id: FrameId, index: usize, value: Value) {
        self.get_mut(id).slots[index] = value;
    }

    /// Reads the slot at a preprocessor-computed lexical address.
    pub fn local_ref(&self, env: Option<FrameId>, depth: usize, index: usize) -> Value {
        let mut cursor = env;
        for _ in 0..depth {
            cursor = cursor.and_then(|id| self.get(id).parent);
        }
        match cursor {
            Some(id) => self.get(id).slots[index].clone(),
            None => Value::Void, // unreachable for a well-formed address
        }
    }

    /// Writes the slot at a preprocessor-computed lexical address.
    pub fn local_set(
        &mut self,
        env: Option<FrameId>,
        depth: usize,
        index: usize,
        value: Value,
    ) {
        let mut cursor = env;
        for _ in 0..depth {
            cursor = cursor.and_then(|id| self.get(id).parent);
        }
        if let Some(id) = cursor {
            self.get_mut(id).slots[index] = value;
        }
    }
}

pub fn unbound(namespace: Namespace, var: VarId) -> Error {
    Error::Evaluator(EvaluatorError::UnboundVariable {
        namespace,
        name: interner::var_name(var),
    })
}

//===----------------------------------------------------------------------===//
// Global cells
//===----------------------------------------------------------------------===//

#[derive(Debug, Default)]
struct Cells {
    value: Option<Value>,
    function: Option<Value>,
}

/// The two binding cells every interned variable owns: the sole storage
/// for global state. Owned by the evaluator; torn down by INITIALIZE.
#[derive(Debug, Default)]
pub struct Globals {
    cells: FxHashMap<VarId, Cells>,
}

impl Globals {
    pub fn new() -> Self {
        Self { cells: FxHashMap::default() }
    }

    pub fn get(&self, namespace: Namespace, var: VarId) -> Option<Value> {
        let cells = self.cells.get(&var)?;
        match namespace {
            Namespace::Value => cells.value.clone(),
            Namespace::Function => cells.function.clone(),
        }
    }

    pub fn set(&mut self, namespace: Namespace, var: VarId, value: Value) {
        let cells = self.cells.entry(var).or_default();
        match namespace {
            Namespace::Value => cells.value = Some(value),
            Namespace::Function => cells.function = Some(value),
        }
    }

    /// The current `*features*` binding as a vector of variables; empty
    /// when unbound or not a proper list of variables.
    pub fn feature_list(&self) -> Vec<VarId> {
        let var = interner::intern_var("*features*");
        let Some(list) = self.get(Namespace::Value, var) else {
            return Vec::new();
        };
        let Some(items) = crate::value::list_to_vec(&list) else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Variable(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::intern_var;

    #[test]
    fn lookup_walks_the_chain_and_falls_through_to_globals() {
        let mut frames = Frames::new();
        let mut globals = Globals::new();
        let x = intern_var("env-x");
        let y = intern_var("env-y");

        globals.set(Namespace::Value, y, Value::Number(9.0));

        let outer = frames.alloc(Frame {
            namespace: Namespace::Value,
            vars: vec![x],
            slots: vec![Value::Number(1.0)],
            parent: None,
        });
        let inner = frames.alloc(Frame {
            namespace: Namespace::Function,
            vars: vec![x],
            slots: vec![Value::Number(2.0)],
            parent: Some(outer),
        });

        // Value-namespace lookup skips the function frame.
        let v = frames
            .lookup(Some(inner), &globals, Namespace::Value, x)
            .unwrap();
        assert_eq!(v.to_string(), "1");

        let f = frames
            .lookup(Some(inner), &globals, Namespace::Function, x)
            .unwrap();
        assert_eq!(f.to_string(), "2");

        let g = frames
            .lookup(Some(inner), &globals, Namespace::Value, y)
            .unwrap();
        assert_eq!(g.to_string(), "9");

        let missing = frames.lookup(Some(inner), &globals, Namespace::Function, y);
        assert!(matches!(
            missing,
            Err(Error::Evaluator(EvaluatorError::UnboundVariable { .. }))
        ));
    }

    #[test]
    fn assign_updates_innermost_binding_else_global() {
        let mut frames = Frames::new();
        let mut globals = Globals::new();
        let x = intern_var("assign-x");
        let g = intern_var("assign-g");

        let frame = frames.alloc(Frame {
            namespace: Namespace::Value,
            vars: vec![x],
            slots: vec![Value::Number(1.0)],
            parent: None,
        });

        frames.assign(Some(frame), &mut globals, Namespace::Value, x, Value::Number(5.0));
        assert_eq!(
            frames
                .lookup(Some(frame), &globals, Namespace::Value, x)
                .unwrap()
                .to_string(),
            "5"
        );
        assert!(globals.get(Namespace::Value, x).is_none());

        frames.assign(Some(frame), &mut globals, Namespace::Value, g, Value::Number(7.0));
        assert_eq!(globals.get(Namespace::Value, g).unwrap().to_string(), "7");
    }

    #[test]
    fn local_addresses_reach_the_right_slot() {
        let mut frames = Frames::new();
        let a = intern_var("addr-a");
        let b = intern_var("addr-b");

        let outer = frames.alloc(Frame {
            namespace: Namespace::Value,
            vars: vec![a],
            slots: vec![Value::Number(10.0)],
            parent: None,
        });
        let inner = frames.alloc(Frame {
            namespace: Namespace::Value,
            vars: vec![b],
            slots: vec![Value::Number(20.0)],
            parent: Some(outer),
        });

        assert_eq!(frames.local_ref(Some(inner), 0, 0).to_string(), "20");
        assert_eq!(frames.local_ref(Some(inner), 1, 0).to_string(), "10");

        frames.local_set(Some(inner), 1, 0, Value::Number(11.0));
        assert_eq!(frames.local_ref(Some(inner), 1, 0).to_string(), "11");
    }

    #[test]
    fn feature_list_reads_the_features_binding() {
        let mut globals = Globals::new();
        assert!(globals.feature_list().is_empty());

        let feat = intern_var("some-strategy");
        globals.set(
            Namespace::Value,
            intern_var("*features*"),
            crate::value::list_from_vec(vec![Value::Variable(feat)]),
        );
        assert_eq!(globals.feature_list(), vec![feat]);
    }
}
