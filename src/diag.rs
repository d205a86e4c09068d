//! Diagnostics produced by the analyses and passes.
//!
//! Each diagnosable condition has one stable [`DiagKind`] key. Analyses run
//! on several threads, so the adapter buffers everything under a mutex and
//! drains sorted by source position; rendering belongs to the surrounding
//! compiler and is out of scope here.

use parking_lot::Mutex;

use crate::SourceRange;

/// The severity of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
  /// A warning; compilation continues.
  Warning,
  /// An error; compilation fails after the current phase.
  Error,
}

/// The stable key of a diagnosable condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagKind {
  /// Throwing-overflow arithmetic with known operands.
  ArithmeticOperatorOverflow,
  /// `x / 0` or `x % 0` with a known zero divisor.
  DivisorIsZero,
  /// Negative or too-large shift amount.
  ShiftLengthOverflow,
  /// Throwing typecast with a known out-of-range operand.
  TypecastOverflow,
  /// Array/VArray access with a known out-of-bounds index.
  IdxOutOfBounds,
  /// `Range` constructor with a known zero step.
  StepNonZeroRange,
  /// Provably unreachable source-visible branch.
  DceUnreachableBlockInExpression,
  /// Match arm proven dead.
  UnreachablePattern,
  /// Dead quest/binary arm.
  DceUnreachableExpression,
  /// A local variable with no live use.
  UnusedVariable,
  /// A parameter with no live use.
  UnusedParameter,
  /// A lambda variable with no live use.
  UnusedLambdaVariable,
  /// An expression whose result is syntactically discarded.
  UnusedExpression,
  /// An unused function.
  UnusedFunction,
  /// An unused global variable.
  UnusedGlobalVariable,
  /// `pcTable` enabled without any counter/guard/bool-flag option.
  SancovIllegalUsageOfPcTable,
  /// A counter/guard option enabled without a coverage level.
  SancovIllegalUsageOfLevel,
}

impl DiagKind {
  /// The stable identifier of this key.
  #[must_use] pub fn key(self) -> &'static str {
    match self {
      Self::ArithmeticOperatorOverflow => "chir_arithmetic_operator_overflow",
      Self::DivisorIsZero => "chir_divisor_is_zero",
      Self::ShiftLengthOverflow => "chir_shift_length_overflow",
      Self::TypecastOverflow => "chir_typecast_overflow",
      Self::IdxOutOfBounds => "chir_idx_out_of_bounds",
      Self::StepNonZeroRange => "chir_step_non_zero_range",
      Self::DceUnreachableBlockInExpression => "chir_dce_unreachable_block_in_expression",
      Self::UnreachablePattern => "chir_unreachable_pattern",
      Self::DceUnreachableExpression => "chir_dce_unreachable_expression",
      Self::UnusedVariable => "chir_dce_unused_variable",
      Self::UnusedParameter => "chir_dce_unused_parameter",
      Self::UnusedLambdaVariable => "chir_dce_unused_lambda_variable",
      Self::UnusedExpression => "chir_dce_unused_expression",
      Self::UnusedFunction => "chir_dce_unused_function",
      Self::UnusedGlobalVariable => "chir_dce_unused_global_variable",
      Self::SancovIllegalUsageOfPcTable => "chir_sancov_illegal_usage_of_pc_table",
      Self::SancovIllegalUsageOfLevel => "chir_sancov_illegal_usage_of_level",
    }
  }

  /// The default severity of this key.
  #[must_use] pub fn severity(self) -> Severity {
    match self {
      Self::ArithmeticOperatorOverflow
      | Self::DivisorIsZero
      | Self::ShiftLengthOverflow
      | Self::TypecastOverflow
      | Self::IdxOutOfBounds
      | Self::StepNonZeroRange
      | Self::SancovIllegalUsageOfPcTable
      | Self::SancovIllegalUsageOfLevel => Severity::Error,
      _ => Severity::Warning,
    }
  }
}

/// One emitted diagnostic: a key, a source range, the primary hint strings
/// and optional notes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
  /// The stable key.
  pub kind: DiagKind,
  /// The severity.
  pub severity: Severity,
  /// The cited source range.
  pub range: SourceRange,
  /// Arguments to the main hint, derived from operand types/values.
  pub main_hints: Vec<String>,
  /// Additional notes, e.g. `range of Int8 is -128 ~ 127`.
  pub notes: Vec<String>,
}

/// An in-flight diagnostic; flushed into the adapter's buffer on drop, the
/// way the surrounding compiler's diagnostic builders behave.
pub struct DiagBuilder<'a> {
  adapter: &'a DiagAdapter,
  diag: Option<Diagnostic>,
}

impl DiagBuilder<'_> {
  /// Append an argument to the main hint.
  pub fn main_hint(&mut self, hint: impl Into<String>) -> &mut Self {
    self.diag.as_mut().expect("flushed").main_hints.push(hint.into());
    self
  }

  /// Append a note.
  pub fn note(&mut self, note: impl Into<String>) -> &mut Self {
    self.diag.as_mut().expect("flushed").notes.push(note.into());
    self
  }
}

impl Drop for DiagBuilder<'_> {
  fn drop(&mut self) {
    if let Some(diag) = self.diag.take() {
      let mut buf = self.adapter.buf.lock();
      // The fixed-point iteration and the result replay both run the
      // transfer functions, so an identical emission is a re-visit, not a
      // second defect.
      if !buf.contains(&diag) {
        buf.push(diag);
      }
    }
  }
}

/// The buffered, thread-safe diagnostic sink.
#[derive(Debug, Default)]
pub struct DiagAdapter {
  buf: Mutex<Vec<Diagnostic>>,
}

impl DiagAdapter {
  /// Create an empty adapter.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Start a diagnostic of kind `kind` at `range`.
  pub fn diagnose(&self, kind: DiagKind, range: SourceRange) -> DiagBuilder<'_> {
    DiagBuilder {
      adapter: self,
      diag: Some(Diagnostic {
        kind,
        severity: kind.severity(),
        range,
        main_hints: vec![],
        notes: vec![],
      }),
    }
  }

  /// The number of buffered diagnostics of kind `kind`.
  #[must_use] pub fn count_of(&self, kind: DiagKind) -> usize {
    self.buf.lock().iter().filter(|d| d.kind == kind).count()
  }

  /// Whether any buffered diagnostic is an error.
  #[must_use] pub fn has_errors(&self) -> bool {
    self.buf.lock().iter().any(|d| d.severity == Severity::Error)
  }

  /// Drain the buffer sorted by source position, then by key; parallel
  /// emission order is unobservable through this.
  #[must_use] pub fn take_sorted(&self) -> Vec<Diagnostic> {
    let mut diags = std::mem::take(&mut *self.buf.lock());
    diags.sort_by(|a, b| a.range.cmp(&b.range).then_with(|| a.kind.cmp(&b.kind)));
    diags
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern;

  #[test]
  fn builder_flushes_on_drop() {
    let diag = DiagAdapter::new();
    diag
      .diagnose(DiagKind::DivisorIsZero, SourceRange::default())
      .main_hint("divide");
    assert_eq!(diag.count_of(DiagKind::DivisorIsZero), 1);
  }

  #[test]
  fn drain_sorts_by_position() {
    let diag = DiagAdapter::new();
    let file = intern("a.cj");
    diag.diagnose(DiagKind::UnusedVariable, SourceRange::new(file, (4, 1), (4, 2)));
    diag.diagnose(DiagKind::UnusedVariable, SourceRange::new(file, (2, 1), (2, 2)));
    let drained = diag.take_sorted();
    assert_eq!(drained[0].range.begin.line, 2);
    assert_eq!(drained[1].range.begin.line, 4);
    assert!(diag.take_sorted().is_empty());
  }
}
