//! Built-in function registry and dispatch.
//!
//! Builtins are registered at evaluator construction, keyed by normalized
//! name. Each receives the evaluator context and its evaluated arguments and
//! returns a value or an error. Many array/string builtins are also
//! reachable through method-call sugar (`a.Add(x)` is `Add(a, x)`).

mod arrays;
mod general;
mod math;
mod strings;

use strum::{EnumString, IntoStaticStr, VariantArray};

use crate::{
    exception_public::CodeLoc,
    exception_private::{RunError, RunResult},
    eval::Interp,
    io::PrintWriter,
    resource::ResourceTracker,
    value::Value,
};

/// Every builtin function.
///
/// The strum string form is the *normalized* name used for registration and
/// lookup; display spellings only matter for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr, VariantArray)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Builtin {
    // Output
    PrintLn,
    Print,
    // Arrays
    Length,
    Low,
    High,
    SetLength,
    Add,
    Delete,
    Copy,
    IndexOf,
    Contains,
    Reverse,
    Sort,
    Map,
    Filter,
    Reduce,
    ForEach,
    // Sets
    Include,
    Exclude,
    // Strings
    UpperCase,
    LowerCase,
    Trim,
    Pos,
    StringReplace,
    StringOfChar,
    // Conversion
    IntToStr,
    StrToInt,
    FloatToStr,
    StrToFloat,
    BoolToStr,
    Format,
    // Math
    Abs,
    Min,
    Max,
    Sqrt,
    Sqr,
    Power,
    Trunc,
    Round,
    Floor,
    Ceil,
    Exp,
    Ln,
    Sin,
    Cos,
    Tan,
    Pi,
    Random,
    RandomInt,
    RandomSeed,
    // Ordinals
    Ord,
    Chr,
    Succ,
    Pred,
    Inc,
    Dec,
    // Misc
    Assert,
    Assigned,
    TypeOf,
    VarIsNull,
    VarType,
}

impl Builtin {
    /// Whether `value.Name(args)` method-call sugar may route here with the
    /// receiver as the first argument.
    pub fn is_member_sugar(self) -> bool {
        matches!(
            self,
            Self::Length
                | Self::Low
                | Self::High
                | Self::SetLength
                | Self::Add
                | Self::Delete
                | Self::Copy
                | Self::IndexOf
                | Self::Contains
                | Self::Reverse
                | Self::Sort
                | Self::Map
                | Self::Filter
                | Self::Reduce
                | Self::ForEach
                | Self::Include
                | Self::Exclude
                | Self::UpperCase
                | Self::LowerCase
                | Self::Trim
        )
    }
}

/// Registers every builtin's symbol in the interner, returning the lookup
/// table used by name resolution.
pub(crate) fn builtin_table(interns: &mut crate::intern::Interns) -> ahash::AHashMap<crate::intern::Symbol, Builtin> {
    let mut table = ahash::AHashMap::with_capacity(Builtin::VARIANTS.len());
    for &b in Builtin::VARIANTS {
        let name: &'static str = b.into();
        table.insert(interns.intern(name), b);
    }
    table
}

/// Dispatches a builtin call with evaluated arguments.
pub(crate) fn dispatch<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    builtin: Builtin,
    args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    use Builtin as B;
    match builtin {
        B::PrintLn | B::Print => general::print(interp, args, builtin == B::PrintLn, pos),
        B::Assert => general::assert(interp, args, pos),
        B::Assigned => general::assigned(interp, args, pos),
        B::TypeOf => general::type_of(interp, args, pos),
        B::VarIsNull => general::var_is_null(interp, args, pos),
        B::VarType => general::var_type(interp, args, pos),
        B::Ord => general::ord(interp, args, pos),
        B::Chr => general::chr(interp, args, pos),
        B::Succ => general::succ_pred(interp, args, 1, pos),
        B::Pred => general::succ_pred(interp, args, -1, pos),
        B::Random => general::random(interp, args, pos),
        B::RandomInt => general::random_int(interp, args, pos),
        B::RandomSeed => general::random_seed(interp, args, pos),
        B::Length => arrays::length(interp, args, pos),
        B::Low => arrays::low(interp, args, pos),
        B::High => arrays::high(interp, args, pos),
        B::SetLength => arrays::set_length(interp, args, pos),
        B::Add => arrays::add(interp, args, pos),
        B::Delete => arrays::delete(interp, args, pos),
        B::Copy => arrays::copy(interp, args, pos),
        B::IndexOf => arrays::index_of(interp, args, pos),
        B::Contains => arrays::contains(interp, args, pos),
        B::Reverse => arrays::reverse(interp, args, pos),
        B::Sort => arrays::sort(interp, args, pos),
        B::Map => arrays::map(interp, args, pos),
        B::Filter => arrays::filter(interp, args, pos),
        B::Reduce => arrays::reduce(interp, args, pos),
        B::ForEach => arrays::for_each(interp, args, pos),
        B::Include => arrays::include_exclude(interp, args, true, pos),
        B::Exclude => arrays::include_exclude(interp, args, false, pos),
        B::UpperCase | B::LowerCase | B::Trim => strings::transform(interp, builtin, args, pos),
        B::Pos => strings::pos(interp, args, pos),
        B::StringReplace => strings::string_replace(interp, args, pos),
        B::StringOfChar => strings::string_of_char(interp, args, pos),
        B::IntToStr => strings::int_to_str(interp, args, pos),
        B::StrToInt => strings::str_to_int(interp, args, pos),
        B::FloatToStr => strings::float_to_str(interp, args, pos),
        B::StrToFloat => strings::str_to_float(interp, args, pos),
        B::BoolToStr => strings::bool_to_str(interp, args, pos),
        B::Format => strings::format(interp, args, pos),
        B::Abs | B::Sqrt | B::Sqr | B::Trunc | B::Round | B::Floor | B::Ceil | B::Exp | B::Ln | B::Sin | B::Cos
        | B::Tan => math::unary(interp, builtin, args, pos),
        B::Min | B::Max | B::Power => math::binary(interp, builtin, args, pos),
        B::Pi => math::pi(interp, args, pos),
        B::Inc | B::Dec => Err(RunError::fatal("Inc/Dec require an assignable argument", pos)),
    }
}

/// Arity-check helper shared by the builtin modules.
pub(super) fn check_argc(args: &[Value], min: usize, max: usize, name: &str, pos: CodeLoc) -> RunResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(RunError::fatal(
            format!("{name} expects {expected} argument(s), got {}", args.len()),
            pos,
        ));
    }
    Ok(())
}
