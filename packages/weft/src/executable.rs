use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::{
	ctx::WorkflowCtx,
	error::{did_interrupt, WorkflowError},
};

pub type AsyncResult<'a, T> = BoxFuture<'a, Result<T>>;

/// Something `WorkflowCtx::all` can run: a closure over the context, a tuple
/// of executables, or a vec of them. Branches run concurrently but are
/// dispatched in declaration order, which is what keeps execution-index
/// assignment deterministic across replays.
#[async_trait]
pub trait Executable: Send + Sized {
	type Output: Send;

	async fn execute(self, ctx: &WorkflowCtx) -> Result<Self::Output>;
}

#[async_trait]
impl<F, T> Executable for F
where
	F: for<'a> FnOnce(&'a WorkflowCtx) -> AsyncResult<'a, T> + Send,
	T: Send,
{
	type Output = T;

	async fn execute(self, ctx: &WorkflowCtx) -> Result<T> {
		(self)(ctx).await
	}
}

/// Identity helper that pins a closure's signature to the executable shape,
/// so `ctx.all((closure(|ctx| … .boxed()), …))` infers cleanly.
pub fn closure<F, T>(f: F) -> F
where
	F: for<'a> FnOnce(&'a WorkflowCtx) -> AsyncResult<'a, T> + Send,
	T: Send,
{
	f
}

/// Picks the error that should escape a joined set: a suspension control
/// signal wins over plain failures so the executor can collate the registered
/// envelopes. Individual branch errors never short circuit the join.
fn pick_error(mut errs: Vec<anyhow::Error>) -> anyhow::Error {
	if let Some(pos) = errs.iter().position(did_interrupt) {
		return errs.swap_remove(pos);
	}

	errs.into_iter().next().unwrap_or_else(|| {
		WorkflowError::ReplayDiverged("parallel combinator produced no output".into()).into()
	})
}

macro_rules! impl_executable_tuple {
	($(($T:ident, $v:ident)),+) => {
		#[async_trait]
		impl<$($T: Executable),+> Executable for ($($T,)+) {
			type Output = ($($T::Output,)+);

			async fn execute(self, ctx: &WorkflowCtx) -> Result<Self::Output> {
				let ($($v,)+) = self;
				let ($($v,)+) = futures_util::join!($($v.execute(ctx)),+);

				let mut errs: Vec<anyhow::Error> = Vec::new();
				$(
					let $v = match $v {
						Ok(v) => Some(v),
						Err(err) => {
							errs.push(err);
							None
						}
					};
				)+

				if let ($(Some($v),)+) = ($($v,)+) {
					return Ok(($($v,)+));
				}

				Err(pick_error(errs))
			}
		}
	};
}

impl_executable_tuple!((A, a), (B, b));
impl_executable_tuple!((A, a), (B, b), (C, c));
impl_executable_tuple!((A, a), (B, b), (C, c), (D, d));
impl_executable_tuple!((A, a), (B, b), (C, c), (D, d), (E, e));
impl_executable_tuple!((A, a), (B, b), (C, c), (D, d), (E, e), (G, g));

#[async_trait]
impl<T: Executable> Executable for Vec<T> {
	type Output = Vec<T::Output>;

	async fn execute(self, ctx: &WorkflowCtx) -> Result<Self::Output> {
		let results =
			futures_util::future::join_all(self.into_iter().map(|item| item.execute(ctx))).await;

		let mut out = Vec::with_capacity(results.len());
		let mut errs = Vec::new();
		for result in results {
			match result {
				Ok(v) => out.push(v),
				Err(err) => errs.push(err),
			}
		}

		if errs.is_empty() {
			Ok(out)
		} else {
			Err(pick_error(errs))
		}
	}
}
