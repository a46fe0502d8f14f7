// dict.rs - Dictionary entries, behavior kinds, lookup and registration

use crate::error::VmError;
use crate::vm::Vm;

/// Names longer than this are truncated, matching the header layout of
/// classic threaded-code Forths.
pub const NAME_MAX: usize = 31;

/// A host primitive. Everything outside the core (file I/O, console,
/// loaders) plugs in exclusively through `Vm::register` with one of
/// these.
pub type PrimFn = fn(&mut Vm) -> Result<(), VmError>;

/// Behavior kind of a dictionary entry. Dispatch is a closed match on
/// this tag; there is no open-ended handler table.
#[derive(Clone, Copy)]
pub enum Code {
    /// Registered host primitive.
    Native(PrimFn),
    /// Colon definition: `body` is the arena offset of a threaded XT list.
    Colon { body: usize },
    /// CREATEd word or VARIABLE: invoking pushes the data address.
    Variable { addr: usize },
    /// CONSTANT: invoking pushes the value directly.
    Constant { value: i64 },
    /// DOES> child: invoking pushes `addr`, then runs the threaded code
    /// at `code` (the shared custom behavior of the defining word).
    Does { addr: usize, code: usize },
}

impl std::fmt::Debug for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Code::Native(_) => write!(f, "Native"),
            Code::Colon { body } => write!(f, "Colon({})", body),
            Code::Variable { addr } => write!(f, "Variable({})", addr),
            Code::Constant { value } => write!(f, "Constant({})", value),
            Code::Does { addr, code } => write!(f, "Does({}, {})", addr, code),
        }
    }
}

/// One dictionary entry. Entries are append-only and index-stable:
/// redefining a name adds a new entry that shadows the old one in future
/// lookups without touching it. The only later mutations are clearing
/// `hidden` when `;` closes a definition and the Variable -> Does retag
/// performed by the (does>) runtime.
#[derive(Debug, Clone)]
pub struct Word {
    pub link: Option<usize>,
    pub name: String,
    pub immediate: bool,
    pub hidden: bool,
    pub code: Code,
}

impl Vm {
    /// Append a raw header and make it the latest entry.
    pub fn add_word(&mut self, name: &str, code: Code, immediate: bool, hidden: bool) -> usize {
        let mut name = name.to_string();
        name.truncate(NAME_MAX);
        let xt = self.dict.len();
        self.dict.push(Word {
            link: self.latest,
            name,
            immediate,
            hidden,
            code,
        });
        self.latest = Some(xt);
        xt
    }

    /// Register a host primitive. This is the seam external collaborators
    /// use; the returned XT is the word's permanent handle.
    pub fn register(&mut self, name: &str, f: PrimFn, immediate: bool) -> usize {
        self.add_word(name, Code::Native(f), immediate, false)
    }

    pub fn add_constant(&mut self, name: &str, value: i64) -> usize {
        self.add_word(name, Code::Constant { value }, false, false)
    }

    /// Define a variable backed by one freshly allotted arena cell.
    pub fn add_variable(&mut self, name: &str, initial: i64) -> Result<usize, VmError> {
        self.align_here();
        let addr = self.here;
        self.allot(crate::vm::CELL as i64)?;
        self.mem_store(addr, initial)?;
        Ok(self.add_word(name, Code::Variable { addr }, false, false))
    }

    /// Walk the back-links from the newest entry looking for `name`,
    /// case-insensitively. Hidden entries (definitions still open) are
    /// skipped. First match wins, which is what makes shadowing work.
    pub fn find(&self, name: &str) -> Option<usize> {
        let mut cursor = self.latest;
        while let Some(xt) = cursor {
            let w = &self.dict[xt];
            if !w.hidden && w.name.len() == name.len() && w.name.eq_ignore_ascii_case(name) {
                return Some(xt);
            }
            cursor = w.link;
        }
        None
    }

    /// Body address of a CREATEd word, for >BODY.
    pub fn body_addr(&self, xt: usize) -> Result<usize, VmError> {
        match self.dict[xt].code {
            Code::Variable { addr } => Ok(addr),
            Code::Does { addr, .. } => Ok(addr),
            Code::Colon { body } => Ok(body),
            _ => Err(VmError::Aborted(format!(
                ">body: {} has no body",
                self.dict[xt].name
            ))),
        }
    }
}
