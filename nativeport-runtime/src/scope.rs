//! Deterministic release scopes
//!
//! Design: each thread keeps a stack of open scopes. A handle that receives a
//! deallocator joins the innermost owning scope; closing the scope releases
//! its members newest first. Scopes are guards: dropping one closes it.
//!
//! ```ignore
//! let scope = Scope::open();
//! let buffer = AddressHandle::allocate(HandleKind::Int, 64)?;
//! drop(scope); // buffer.is_null() is now true
//! ```

use crate::error::{Error, Result};
use crate::handle::{AddressHandle, HandleKind, ReleaseCell};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SCOPES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct Frame {
    id: u64,
    owning: bool,
    kinds: Option<Vec<HandleKind>>,
    extend: bool,
    members: Vec<Arc<ReleaseCell>>,
}

impl Frame {
    fn accepts(&self, kind: &HandleKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(kind))
    }
}

/// Guard for one open scope on the current thread
#[must_use = "a scope closes as soon as its guard is dropped"]
pub struct Scope {
    id: u64,
    closed: bool,
    // Frames live in thread-local storage
    _thread_bound: PhantomData<*const ()>,
}

impl Scope {
    /// Open a scope that owns every handle allocated while it is innermost
    pub fn open() -> Scope {
        Self::push(true, None)
    }

    /// Open a scope that only releases handles attached explicitly
    pub fn open_non_owning() -> Scope {
        Self::push(false, None)
    }

    /// Open an owning scope restricted to the given kinds
    pub fn for_kinds(kinds: &[HandleKind]) -> Scope {
        Self::push(true, Some(kinds.to_vec()))
    }

    fn push(owning: bool, kinds: Option<Vec<HandleKind>>) -> Scope {
        let id = NEXT_SCOPE.fetch_add(1, Ordering::Relaxed);
        SCOPES.with(|scopes| {
            scopes.borrow_mut().push(Frame {
                id,
                owning,
                kinds,
                extend: false,
                members: Vec::new(),
            })
        });
        trace!(target: "nativeport::scope", scope = id, owning, "scope opened");
        Scope {
            id,
            closed: false,
            _thread_bound: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of scopes open on this thread
    pub fn inner_depth() -> usize {
        SCOPES.with(|scopes| scopes.borrow().len())
    }

    fn with_frame<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        SCOPES.with(|scopes| {
            scopes
                .borrow_mut()
                .iter_mut()
                .find(|frame| frame.id == self.id)
                .map(f)
        })
    }

    /// Track `handle` regardless of the owning flag.
    ///
    /// Handles without a deallocator have nothing to release and are ignored.
    pub fn attach(&self, handle: &AddressHandle) -> Result<&Self> {
        let Some(cell) = handle.release_cell() else {
            return Ok(self);
        };
        self.with_frame(|frame| {
            if !frame.accepts(handle.kind()) {
                return Err(Error::KindNotAllowed {
                    kind: handle.kind().to_string(),
                });
            }
            if !frame.members.iter().any(|m| Arc::ptr_eq(m, cell)) {
                frame.members.push(Arc::clone(cell));
            }
            Ok(())
        })
        .unwrap_or(Ok(()))?;
        Ok(self)
    }

    /// Stop tracking `handle`; closing the scope will leave it alone
    pub fn detach(&self, handle: &AddressHandle) -> &Self {
        if let Some(cell) = handle.release_cell() {
            self.with_frame(|frame| frame.members.retain(|m| !Arc::ptr_eq(m, cell)));
        }
        self
    }

    /// The next close hands members to the enclosing scope instead of releasing them
    pub fn extend(&self) -> &Self {
        self.with_frame(|frame| frame.extend = true);
        self
    }

    /// Release every member now, keeping the scope open
    pub fn deallocate(&self) {
        let members = self
            .with_frame(|frame| core::mem::take(&mut frame.members))
            .unwrap_or_default();
        release_all(self.id, members);
    }

    /// Number of tracked members
    pub fn len(&self) -> usize {
        self.with_frame(|frame| frame.members.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close this scope. Only the innermost scope may be closed.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let frame = SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            match scopes.last().map(|top| top.id) {
                Some(top) if top == self.id => Ok(scopes.pop()),
                Some(top) => Err(Error::ScopeOrder {
                    closing: self.id,
                    innermost: top,
                }),
                None => Ok(None),
            }
        })?;
        self.closed = true;
        if let Some(frame) = frame {
            finish(frame);
        }
        Ok(())
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close() {
            error!(target: "nativeport::scope", error = %err, "scope dropped out of order");
            let frame = SCOPES.with(|scopes| {
                let mut scopes = scopes.borrow_mut();
                let index = scopes.iter().position(|frame| frame.id == self.id)?;
                Some(scopes.remove(index))
            });
            self.closed = true;
            if let Some(frame) = frame {
                finish(frame);
            }
        }
    }
}

fn finish(frame: Frame) {
    if frame.extend {
        let orphans = SCOPES.with(|scopes| match scopes.borrow_mut().last_mut() {
            Some(parent) => {
                parent.members.extend(frame.members);
                None
            }
            None => Some(frame.members),
        });
        trace!(
            target: "nativeport::scope",
            scope = frame.id,
            handed_over = orphans.is_none(),
            "extended scope closed"
        );
        // Dropped outside the borrow; unreferenced members go to the tracker
        drop(orphans);
        return;
    }
    release_all(frame.id, frame.members);
}

fn release_all(scope: u64, members: Vec<Arc<ReleaseCell>>) {
    let count = members.len();
    for member in members.into_iter().rev() {
        member.release();
    }
    trace!(target: "nativeport::scope", scope, released = count, "scope members released");
}

/// Called for every handle that just received a deallocator
pub(crate) fn adopt(cell: &Arc<ReleaseCell>, kind: &HandleKind) {
    SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        if let Some(frame) = scopes.last_mut() {
            if frame.owning && frame.accepts(kind) {
                frame.members.push(Arc::clone(cell));
            }
        }
    });
}
