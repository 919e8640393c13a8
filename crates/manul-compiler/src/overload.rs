//! Overload resolution.
//!
//! A call site names a receiver type, a member name, and argument types;
//! resolution collects the applicable signatures over the receiver's
//! superclass chain and ranks them by how specific they are. The candidate
//! whose parameters are closest to the arguments in the hierarchy wins;
//! ties fall to the most derived declaring class; anything still tied is an
//! ambiguity error, and an empty applicable set is a resolution error. Both
//! are reported as diagnostics and the call site is not translated.

use manul_core::{ClassId, ClassTable, CompileError, Span, Type};

use crate::registry::{CTOR_NAME, SigId, SignatureTable};

/// A candidate that passed the applicability check, with its ranking cost.
#[derive(Debug, Clone)]
struct OverloadMatch {
    sig: SigId,
    /// Sum of hierarchy distances from each argument to its parameter.
    total_cost: u32,
    /// Hierarchy distance from the receiver to the declaring class.
    declaring_distance: u32,
}

/// Resolve a method call against the receiver's class hierarchy.
pub fn resolve_call(
    classes: &ClassTable,
    sigs: &SignatureTable,
    receiver: ClassId,
    name: &str,
    args: &[Type],
    span: Span,
) -> Result<SigId, CompileError> {
    let mut viable = Vec::new();
    for owner in classes.chain(receiver) {
        for &sid in sigs.members_named(owner, name) {
            if let Some(cost) = applicability_cost(classes, sigs, sid, args) {
                viable.push(OverloadMatch {
                    sig: sid,
                    total_cost: cost,
                    // chain() yields owners in subtype order, so the
                    // distance is recoverable, but ask the table to keep
                    // the ranking self-contained.
                    declaring_distance: classes.distance(receiver, owner).unwrap_or(u32::MAX),
                });
            }
        }
    }
    find_best_match(viable, classes, sigs, name, args, span)
}

/// Resolve a constructor call. Constructors are not inherited, so only the
/// class's own declarations are considered.
pub fn resolve_ctor(
    classes: &ClassTable,
    sigs: &SignatureTable,
    class: ClassId,
    args: &[Type],
    span: Span,
) -> Result<SigId, CompileError> {
    let viable: Vec<OverloadMatch> = sigs
        .members_named(class, CTOR_NAME)
        .iter()
        .filter_map(|&sid| {
            applicability_cost(classes, sigs, sid, args).map(|cost| OverloadMatch {
                sig: sid,
                total_cost: cost,
                declaring_distance: 0,
            })
        })
        .collect();
    find_best_match(viable, classes, sigs, CTOR_NAME, args, span)
}

/// Whether `args` can invoke `sid`, and at what total hierarchy cost.
///
/// Every argument must be a subtype of its parameter; the cost of one
/// argument is its distance up the chain to the parameter type (zero for an
/// exact match, `None` overall when any argument does not fit).
fn applicability_cost(
    classes: &ClassTable,
    sigs: &SignatureTable,
    sid: SigId,
    args: &[Type],
) -> Option<u32> {
    let sig = sigs.get(sid);
    if sig.params.len() != args.len() {
        return None;
    }
    let mut total = 0u32;
    for (arg, (_, param)) in args.iter().zip(&sig.params) {
        total += match (arg, param) {
            (Type::Class(sub), Type::Class(sup)) => classes.distance(*sub, *sup)?,
            (a, b) if a == b => 0,
            _ => return None,
        };
    }
    Some(total)
}

/// Pick the most specific candidate, or report why none can be picked.
fn find_best_match(
    mut viable: Vec<OverloadMatch>,
    classes: &ClassTable,
    sigs: &SignatureTable,
    name: &str,
    args: &[Type],
    span: Span,
) -> Result<SigId, CompileError> {
    if viable.is_empty() {
        let args: Vec<String> = args.iter().map(|t| t.display(classes).to_string()).collect();
        return Err(CompileError::NoApplicable {
            span,
            name: name.to_string(),
            args: args.join(", "),
        });
    }
    if viable.len() == 1 {
        return Ok(viable[0].sig);
    }

    // Lowest argument cost first, most derived declaring class breaking
    // ties.
    viable.sort_by_key(|m| (m.total_cost, m.declaring_distance));
    let best = &viable[0];
    let second = &viable[1];

    if best.total_cost == second.total_cost
        && best.declaring_distance == second.declaring_distance
    {
        return Err(CompileError::AmbiguousCall {
            span,
            name: name.to_string(),
            candidates: format!(
                "{} and {}",
                sigs.get(best.sig).describe(classes),
                sigs.get(second.sig).describe(classes)
            ),
        });
    }

    Ok(best.sig)
}
