//! Public interface for running scripts.
//!
//! [`Runner`] parses once and can execute many times; each execution builds
//! a fresh heap, scope arena, and registries. Parsed programs serialize with
//! postcard via [`Runner::dump`] / [`Runner::load`] so hosts can cache the
//! parse step.

use ahash::AHashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    builtins,
    class::{ClassMeta, ClassReg},
    exception_public::{ErrorKind, Exception, StackFrame},
    exception_private::RunError,
    eval::Interp,
    intern::{Interns, StaticSymbols, Symbol, normalize},
    io::{PrintWriter, StdPrint},
    namespace::Scopes,
    object::Object,
    parse::{Parsed, parse},
    resource::{NoLimitTracker, ResourceTracker},
    typereg::{TypeId, TypeKind, TypeRegistry},
};

/// Host-provided accessors for one external variable.
///
/// Reads and writes of a `var external` binding go through these callbacks;
/// a missing callback makes the corresponding access a catchable runtime
/// exception.
pub struct ExternalVar {
    /// Called on each read.
    pub read: Option<Box<dyn FnMut() -> Object>>,
    /// Called on each write.
    pub write: Option<Box<dyn FnMut(Object)>>,
}

/// The external-variable table, keyed by case-insensitive name.
#[derive(Default)]
pub struct ExternalVars {
    map: AHashMap<String, ExternalVar>,
}

impl ExternalVars {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers accessors under a (case-insensitive) variable name.
    pub fn insert(&mut self, name: &str, var: ExternalVar) {
        self.map.insert(normalize(name), var);
    }

    /// Registers a read-only external variable.
    pub fn insert_read(&mut self, name: &str, read: impl FnMut() -> Object + 'static) {
        self.insert(
            name,
            ExternalVar {
                read: Some(Box::new(read)),
                write: None,
            },
        );
    }

    pub(crate) fn read(&mut self, normalized: &str) -> Option<Object> {
        self.map.get_mut(normalized).and_then(|v| v.read.as_mut()).map(|f| f())
    }

    pub(crate) fn write(&mut self, normalized: &str, value: Object) -> bool {
        match self.map.get_mut(normalized).and_then(|v| v.write.as_mut()) {
            Some(f) => {
                f(value);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for ExternalVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalVars").field("count", &self.map.len()).finish()
    }
}

/// Per-run configuration.
#[derive(Debug, Default)]
pub struct RunConfig {
    /// Seed override for the script-visible RNG; deterministic builds pass
    /// a fixed seed.
    pub random_seed: Option<u64>,
}

/// Primary interface for running scripts.
///
/// # Example
/// ```
/// use dws::{CollectStringPrint, Runner};
///
/// let runner = Runner::new("PrintLn(1 + 2);".to_owned(), "demo.pas").unwrap();
/// let mut print = CollectStringPrint::new();
/// runner.run(dws::NoLimitTracker::new(), &mut print).unwrap();
/// assert_eq!(print.output(), "3\n");
/// ```
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Runner {
    code: String,
    script_name: String,
    parsed: Parsed,
}

impl Runner {
    /// Parses `code`, returning a reusable runner.
    ///
    /// # Errors
    /// Returns a syntax [`Exception`] when the code cannot be tokenized or
    /// parsed.
    pub fn new(code: String, script_name: &str) -> Result<Self, Exception> {
        let parsed = parse(&code).map_err(|e| e.into_exception(script_name))?;
        Ok(Self {
            code,
            script_name: script_name.to_owned(),
            parsed,
        })
    }

    /// Returns the source that was parsed to create this runner.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Executes the program to completion.
    ///
    /// Returns the value of the program's final expression statement
    /// (`Object::Nil` when there is none), or an error describing an
    /// uncaught exception or fatal failure.
    pub fn run(&self, tracker: impl ResourceTracker, print: &mut impl PrintWriter) -> Result<Object, Exception> {
        let mut externals = ExternalVars::new();
        self.run_with_config(&RunConfig::default(), &mut externals, tracker, print)
    }

    /// Executes with no resource limits, printing to stdout.
    pub fn run_no_limits(&self) -> Result<Object, Exception> {
        self.run(NoLimitTracker::new(), &mut StdPrint)
    }

    /// Executes with explicit configuration and external-variable accessors.
    pub fn run_with_config(
        &self,
        config: &RunConfig,
        externals: &mut ExternalVars,
        tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
    ) -> Result<Object, Exception> {
        let mut interns = self.parsed.interns.clone();
        let mut typereg = TypeRegistry::new(&mut interns);
        let mut classes = ClassReg::empty();
        register_builtin_classes(&mut classes, &mut typereg, &mut interns);
        let builtin_table = builtins::builtin_table(&mut interns);
        let rng = match config.random_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut interp = Interp {
            program: &self.parsed.program,
            interns: &mut interns,
            heap: crate::heap::Heap::new(tracker),
            scopes: Scopes::new(),
            typereg,
            classes,
            print,
            func_table: AHashMap::new(),
            builtin_table,
            externals,
            rng,
            handler_stack: Vec::new(),
            raise_frames: Vec::new(),
        };
        if let Err(e) = interp.register_decls() {
            return Err(into_exception(&mut interp, e, &self.script_name));
        }
        match interp.run_main() {
            Ok(last) => {
                let result = match &last {
                    Some(v) => interp.object_from_value(v),
                    None => Object::Nil,
                };
                if let Some(v) = last
                    && let Err(e) = interp.discard(v)
                {
                    return Err(into_exception(&mut interp, e, &self.script_name));
                }
                if let Err(e) = interp.teardown() {
                    return Err(into_exception(&mut interp, e, &self.script_name));
                }
                Ok(result)
            }
            Err(e) => Err(into_exception(&mut interp, e, &self.script_name)),
        }
    }

    /// Serializes the runner to a binary format for caching.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a runner serialized with [`Runner::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Converts an in-flight runtime error into the public exception type,
/// capturing the live call stack.
fn into_exception<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    err: RunError,
    script: &str,
) -> Exception {
    let raw_frames = match &err {
        // Frames were unwound during propagation; use the capture taken at
        // the raise site.
        RunError::Raise { .. } => interp.raise_frames.clone(),
        RunError::Fatal { .. } => interp.scopes.capture_frames(),
    };
    let frames: Vec<StackFrame> = raw_frames
        .into_iter()
        .map(|(name, loc)| StackFrame {
            function: interp.interns.get(name).to_owned(),
            loc,
        })
        .collect();
    match err {
        RunError::Fatal { message, pos } => {
            Exception::new(ErrorKind::Fatal, String::new(), message, script.to_owned(), pos).with_frames(frames)
        }
        RunError::Raise { value, pos } => {
            let (class_name, message) = interp.exception_text(&value);
            // The error owned a reference to the exception object.
            let _ = interp.release_owned_value(value);
            Exception::new(
                ErrorKind::Runtime,
                class_name,
                format!("uncaught exception: {message}"),
                script.to_owned(),
                pos,
            )
            .with_frames(frames)
        }
    }
}

/// Registers the root class and the builtin exception hierarchy.
fn register_builtin_classes(classes: &mut ClassReg, typereg: &mut TypeRegistry, interns: &mut Interns) {
    let tobject_sym = interns.intern("TObject");
    let tobject = classes.add_class(ClassMeta::shell(tobject_sym, None, TypeId::VARIANT));
    let typ = typereg.register_named(tobject_sym, TypeKind::Class(tobject));
    classes.class_mut(tobject).typ = typ;

    let exception = {
        let sym = Symbol::from(StaticSymbols::Exception);
        let cid = classes.add_class(ClassMeta::shell(sym, Some(tobject), TypeId::VARIANT));
        let typ = typereg.register_named(sym, TypeKind::Class(cid));
        let meta = classes.class_mut(cid);
        meta.typ = typ;
        meta.fields.insert(Symbol::from(StaticSymbols::Message), TypeId::STRING);
        cid
    };
    classes.set_exception_base(exception);

    for exc in [
        StaticSymbols::EAssertionFailed,
        StaticSymbols::EZeroDivide,
        StaticSymbols::EIndexOutOfRange,
        StaticSymbols::ERangeError,
        StaticSymbols::EInvalidCast,
        StaticSymbols::EConvertError,
        StaticSymbols::EObjectDestroyed,
        StaticSymbols::EContractFailed,
        StaticSymbols::EExternalError,
        StaticSymbols::EScriptError,
    ] {
        let sym = Symbol::from(exc);
        let cid = classes.add_class(ClassMeta::shell(sym, Some(exception), TypeId::VARIANT));
        let typ = typereg.register_named(sym, TypeKind::Class(cid));
        classes.class_mut(cid).typ = typ;
    }
}
