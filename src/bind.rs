// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
//! Front-binding of completion arguments.
//!
//! Releasing a composed operation's storage produces a [`BoundCompletion`]:
//! the original completion handler with some arguments already bound at the
//! front of its argument list. The terminal upcall binds the entire result
//! and invokes with nothing further; other callers may bind a prefix and
//! supply the rest later, e.g. to tag which sub-operation a result came
//! from. Argument lists are ordinary tuples.

use crate::handler::CompletionHandler;

/// Concatenates an argument-list tuple onto the back of `self`.
pub trait Prepend<Suffix> {
    /// The combined argument list.
    type Output;

    /// Returns `self` followed by `suffix`, preserving order.
    fn prepend(self, suffix: Suffix) -> Self::Output;
}

impl<S> Prepend<S> for () {
    type Output = S;

    fn prepend(self, suffix: S) -> S {
        suffix
    }
}

impl<A> Prepend<()> for (A,) {
    type Output = (A,);

    fn prepend(self, _suffix: ()) -> (A,) {
        self
    }
}

impl<A, B> Prepend<(B,)> for (A,) {
    type Output = (A, B);

    fn prepend(self, suffix: (B,)) -> (A, B) {
        (self.0, suffix.0)
    }
}

impl<A, B, C> Prepend<(B, C)> for (A,) {
    type Output = (A, B, C);

    fn prepend(self, suffix: (B, C)) -> (A, B, C) {
        (self.0, suffix.0, suffix.1)
    }
}

impl<A, B> Prepend<()> for (A, B) {
    type Output = (A, B);

    fn prepend(self, _suffix: ()) -> (A, B) {
        self
    }
}

impl<A, B, C> Prepend<(C,)> for (A, B) {
    type Output = (A, B, C);

    fn prepend(self, suffix: (C,)) -> (A, B, C) {
        (self.0, self.1, suffix.0)
    }
}

impl<A, B, C, D> Prepend<(C, D)> for (A, B) {
    type Output = (A, B, C, D);

    fn prepend(self, suffix: (C, D)) -> (A, B, C, D) {
        (self.0, self.1, suffix.0, suffix.1)
    }
}

/// Binds `prefix` to the front of `handler`'s argument list.
pub fn bind_front<H, P>(handler: H, prefix: P) -> BoundCompletion<H, P>
where
    H: CompletionHandler,
{
    BoundCompletion { handler, prefix }
}

/// A completion handler with arguments bound at the front.
///
/// Produced by [`bind_front`] or by releasing a composed operation's
/// storage. Consuming it is the single point where the wrapped handler can
/// be invoked.
#[derive(Debug)]
#[must_use = "a bound completion does nothing until invoked"]
pub struct BoundCompletion<H, P> {
    handler: H,
    prefix: P,
}

impl<H, P> BoundCompletion<H, P> {
    /// Invokes the handler with the bound arguments alone. Used by the
    /// terminal upcall, which binds the whole result up front.
    pub fn invoke(self)
    where
        H: CompletionHandler<Result = P>,
    {
        self.handler.complete(self.prefix)
    }

    /// Invokes the handler with the bound arguments followed by `suffix`.
    pub fn call<S>(self, suffix: S)
    where
        P: Prepend<S>,
        H: CompletionHandler<Result = <P as Prepend<S>>::Output>,
    {
        self.handler.complete(self.prefix.prepend(suffix))
    }
}
