use std::cell::Cell;
use std::rc::Rc;

use proptest::prelude::*;

use super::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct A {
    count: RefCount,
    i: i32,
}

impl TrackedObject for A {
    fn ref_counter(&self) -> &RefCount {
        &self.count
    }
}

/// Counts how many times its value has been dropped.
struct DropCounter(Rc<Cell<usize>>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

/// A heap object freed with `commit_delete`, and a stack object released
/// by scope exit, are both silent.
#[test]
fn test_mem_ok() {
    init_logging();
    {
        let mut a = SharedHandle::from_box(Box::new(A { i: 7, ..A::default() }));
        assert_eq!(a.i, 7);
        unsafe { commit_delete(&mut a) };
        assert!(a.is_null());
    }
    {
        let a = A::default();
        {
            let p = unsafe { SharedHandle::from_ref(&a) };
            assert_eq!(p.origin(), Origin::Stack);
            if CHECKED {
                assert_eq!(a.ref_count(), 1);
            }
        }
        assert_eq!(a.ref_count(), 0);
    }
}

#[cfg(memsafe_checked)]
#[test]
fn test_copies_share_the_referent() {
    init_logging();
    let mut owner = SharedHandle::from_box(Box::new(A::default()));
    let copy = owner.clone();
    let mut assigned = SharedHandle::<A>::null();
    assigned.assign(&copy);
    assert_eq!(owner.ref_count(), 3);
    assert_eq!(copy.get(), owner.get());
    assert_eq!(assigned.get(), owner.get());

    drop(copy);
    drop(assigned);
    assert_eq!(owner.ref_count(), 1);
    unsafe { commit_delete(&mut owner) };
}

/// Assignment releases the previous referent with the previous origin,
/// and adopts the origin of the new one.
#[cfg(memsafe_checked)]
#[test]
fn test_assign_switches_origin() {
    init_logging();
    let on_stack = A::default();
    let mut heap = SharedHandle::from_box(Box::new(A::default()));
    {
        let mut p = unsafe { SharedHandle::from_ref(&on_stack) };
        p.assign(&heap);
        assert_eq!(on_stack.ref_count(), 0);
        assert_eq!(heap.ref_count(), 2);
        assert_eq!(p.origin(), Origin::Heap);
    }
    assert_eq!(heap.ref_count(), 1);
    unsafe { commit_delete(&mut heap) };
}

#[cfg(memsafe_checked)]
#[test]
fn test_assign_from_alias_is_balanced() {
    let a = A::default();
    let mut p = unsafe { SharedHandle::from_ref(&a) };
    let alias = p.clone();
    p.assign(&alias);
    p.clone_from(&alias);
    assert_eq!(a.ref_count(), 2);
}

/// The heap object is never committed: dropping the last handle is a leak.
#[cfg(memsafe_checked)]
#[test]
#[should_panic = "memory leak"]
fn test_mem_leak() {
    init_logging();
    let _a = SharedHandle::from_box(Box::new(A::default()));
}

/// The handle outlives the stack object it refers to. The object's
/// destruction must catch it.
#[cfg(memsafe_checked)]
#[test]
#[should_panic = "try delete a living pointer"]
fn test_stack_dangling() {
    init_logging();
    let mut p = SharedHandle::<A>::null();
    {
        let a = A::default();
        p.assign(&unsafe { SharedHandle::from_ref(&a) });
    }
    let _ = p.is_null();
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "try delete a living pointer"]
fn test_delete_alive() {
    init_logging();
    let mut a = SharedHandle::from_box(Box::new(A::default()));
    let _b = a.clone();
    unsafe { commit_delete(&mut a) };
}

#[test]
#[should_panic = "try deref null pointer"]
fn test_use_after_free() {
    init_logging();
    let mut a = SharedHandle::from_box(Box::new(A::default()));
    unsafe { commit_delete(&mut a) };
    let _i = a.i;
}

#[test]
#[should_panic = "try deref null pointer"]
fn test_double_commit_delete() {
    let mut a = SharedHandle::from_box(Box::new(A::default()));
    unsafe {
        commit_delete(&mut a);
        commit_delete(&mut a);
    }
}

#[test]
#[should_panic = "non-nullable"]
fn test_non_nullable_assignment() {
    init_logging();
    let mut p = SharedHandle::from_box(Box::new(A::default()));
    let np = SharedHandle::<A>::null();
    p.assign(&np);
}

#[test]
#[should_panic = "non-nullable"]
fn test_non_nullable_construction() {
    let _p = SharedHandle::<A>::from_option(None, Nullability::NonNull);
}

#[test]
#[should_panic = "non-nullable"]
fn test_non_nullable_raw_construction() {
    let _p = unsafe { SharedHandle::<A>::from_raw(std::ptr::null_mut(), Nullability::NonNull) };
}

#[test]
#[should_panic = "try deref null pointer"]
fn test_deref_null_handle() {
    let p = SharedHandle::<A>::from_option(None, Nullability::Nullable);
    assert!(p.is_null());
    let _i = p.i;
}

#[test]
fn test_nullable_handle_can_be_cleared() {
    let a = A::default();
    let mut p = unsafe { SharedHandle::from_ref_with(&a, Nullability::Nullable) };
    p.assign(&SharedHandle::null());
    assert!(p.is_null());
    assert_eq!(a.ref_count(), 0);
}

/// A panic that is not an ownership violation, caught on the way, must
/// not leave references behind in the objects it unwound past.
#[test]
fn test_caught_panic_keeps_count_balanced() {
    let a = A::default();
    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _p = unsafe { SharedHandle::from_ref(&a) };
        panic!("unrelated failure");
    }));
    assert!(caught.is_err());
    assert_eq!(a.ref_count(), 0);
}

/// Once a caught violation has finished unwinding, handles go back to
/// releasing their references during unrelated panics.
#[test]
fn test_caught_violation_does_not_linger() {
    let caught = std::panic::catch_unwind(|| {
        let p = SharedHandle::<A>::null();
        p.i
    });
    assert!(caught.is_err());

    let a = A::default();
    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _p = unsafe { SharedHandle::from_ref(&a) };
        panic!("unrelated failure");
    }));
    assert!(caught.is_err());
    assert_eq!(a.ref_count(), 0);
}

/// Assigning away from the last handle of a heap object leaks it, just
/// like dropping that handle would.
#[cfg(memsafe_checked)]
#[test]
#[should_panic = "memory leak"]
fn test_leak_on_reassignment() {
    init_logging();
    let b = A::default();
    let mut h = SharedHandle::from_box(Box::new(A::default()));
    let other = unsafe { SharedHandle::from_ref(&b) };
    h.assign(&other);
}

/// A non-nullable handle nulled by commit-delete cannot be copied.
#[test]
#[should_panic = "non-nullable"]
fn test_clone_of_committed_handle() {
    let mut h = SharedHandle::from_box(Box::new(A::default()));
    unsafe { commit_delete(&mut h) };
    let _copy = h.clone();
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "try delete a stack object"]
fn test_commit_delete_of_stack_object() {
    let a = A::default();
    let mut p = unsafe { SharedHandle::from_ref(&a) };
    unsafe { commit_delete(&mut p) };
}

#[test]
fn test_tracked_wrapper() {
    let mut h = SharedHandle::from_box(Box::new(Tracked::new(String::from("tracked"))));
    assert_eq!(h.len(), 7);
    unsafe { commit_delete(&mut h) };

    assert_eq!(Tracked::new(5).into_inner(), 5);
}

/// A cloned object is a distinct object: references to the original are
/// not carried over.
#[cfg(memsafe_checked)]
#[test]
fn test_cloned_object_starts_unreferenced() {
    let a = Tracked::new(1);
    let _p = unsafe { SharedHandle::from_ref(&a) };
    let b = a.clone();
    assert_eq!(a.ref_count(), 1);
    assert_eq!(b.ref_count(), 0);
}

#[cfg(not(memsafe_checked))]
#[test]
fn test_unchecked_build_elides_counting() {
    let a = A::default();
    let _p = unsafe { SharedHandle::from_ref(&a) };
    assert_eq!(a.ref_count(), 0);
    assert_eq!(std::mem::size_of::<RefCount>(), 0);
}

#[derive(Default)]
struct B {
    i: i32,
}

#[test]
#[should_panic = "try deref null pointer"]
fn test_unique() {
    init_logging();
    let mut p = UniqueHandle::<B>::new(B::default());
    let p2 = p.take();
    assert!(p.is_null());
    assert_eq!(p2.i, 0);
    let _i = p.i;
}

#[test]
fn test_unique_frees_exactly_once() {
    let drops = Rc::new(Cell::new(0));
    {
        let mut p = UniqueHandle::<_>::new(DropCounter(drops.clone()));
        let p2 = p.take();
        drop(p);
        assert_eq!(drops.get(), 0);
        drop(p2);
        assert_eq!(drops.get(), 1);
    }
    assert_eq!(drops.get(), 1);
}

#[test]
fn test_unique_move_assign_frees_previous() {
    let first_drops = Rc::new(Cell::new(0));
    let second_drops = Rc::new(Cell::new(0));
    let mut first = UniqueHandle::<_>::new(DropCounter(first_drops.clone()));
    let mut second = UniqueHandle::<_>::new(DropCounter(second_drops.clone()));

    first.move_assign(&mut second);
    assert_eq!(first_drops.get(), 1);
    assert_eq!(second_drops.get(), 0);
    assert!(second.is_null());

    drop(second);
    drop(first);
    assert_eq!(first_drops.get(), 1);
    assert_eq!(second_drops.get(), 1);
}

#[test]
#[should_panic = "non-nullable"]
fn test_unique_move_from_null() {
    let mut p = UniqueHandle::<B>::new(B::default());
    let _q = p.take();
    let _r = p.take();
}

#[test]
#[should_panic = "non-nullable"]
fn test_unique_from_null() {
    let _p = UniqueHandle::<B>::from_option(None);
}

#[test]
fn test_unique_nullable_policy() {
    let mut p = UniqueHandle::<B, true>::default();
    assert!(p.is_null());
    let q = p.take();
    assert!(q.is_null());

    let mut r = UniqueHandle::<B, true>::new(B { i: 3 });
    r.move_assign(&mut p);
    assert!(r.is_null());

    let s = UniqueHandle::<B, true>::new(B { i: 4 });
    assert_eq!(s.into_inner().map(|b| b.i), Some(4));
}

#[test]
fn test_unsafe_inside_region() {
    init_logging();
    let mut handle = UnsafeHandle::from_box(Box::new(41));
    {
        let _region = declare_unsafe!(handle);
        *handle += 1;
        assert_eq!(*handle, 42);
        unsafe { free_unsafe(&mut handle) };
    }
    assert!(handle.is_null());
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "no unsafe region is active"]
fn test_unsafe_outside_region() {
    init_logging();
    let handle = UnsafeHandle::from_box(Box::new(1));
    let _i = *handle;
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "never declared unsafe"]
fn test_unsafe_undeclared_handle() {
    let handle = UnsafeHandle::from_box(Box::new(1));
    let _region = UnsafeScope::enter("somewhere");
    let _i = *handle;
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "no unsafe region is active"]
fn test_unsafe_after_region_exit() {
    let mut handle = UnsafeHandle::from_box(Box::new(1));
    {
        let _region = declare_unsafe!(handle);
        *handle += 1;
    }
    let _i = *handle;
}

fn read_in_own_region(scratch: &mut UnsafeHandle<i32>, smuggled: &UnsafeHandle<i32>) -> i32 {
    let _region = declare_unsafe!(*scratch);
    **smuggled
}

/// A handle passed into another function must be declared there again.
#[cfg(memsafe_checked)]
#[test]
#[should_panic = "is not the declaring region"]
fn test_unsafe_smuggled_into_other_region() {
    let mut handle = UnsafeHandle::from_box(Box::new(1));
    let mut scratch = UnsafeHandle::null();
    let _region = declare_unsafe!(handle);
    assert_eq!(*handle, 1);
    read_in_own_region(&mut scratch, &handle);
}

#[cfg(memsafe_checked)]
#[test]
fn test_nested_regions() {
    let mut outer = UnsafeHandle::from_box(Box::new(1));
    let mut inner = UnsafeHandle::from_box(Box::new(2));
    let _outer_region = declare_unsafe(&mut outer, "outer");
    {
        let _inner_region = declare_unsafe(&mut inner, "inner");
        assert_eq!(region_depth(), 2);
        assert_eq!(*inner, 2);
        unsafe { free_unsafe(&mut inner) };
    }
    assert_eq!(
        active_regions(),
        vec![RegionMarker::const_from("outer")]
    );
    assert_eq!(outer.origin_marker().as_deref(), Some("outer"));
    assert_eq!(*outer, 1);
    unsafe { free_unsafe(&mut outer) };
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "exited out of order"]
fn test_region_exit_out_of_order() {
    let outer = UnsafeScope::enter("outer");
    let _inner = UnsafeScope::enter("inner");
    drop(outer);
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "must declare an unsafe region"]
fn test_duplicate_outside_region() {
    let handle = UnsafeHandle::from_box(Box::new(1));
    let _copy = unsafe { handle.duplicate() };
}

#[cfg(memsafe_checked)]
#[test]
#[should_panic = "must declare an unsafe region"]
fn test_free_unsafe_outside_region() {
    let mut handle = UnsafeHandle::from_box(Box::new(1));
    unsafe { free_unsafe(&mut handle) };
}

#[test]
fn test_duplicate_and_assign_inside_region() {
    let mut handle = UnsafeHandle::from_box(Box::new(5));
    let mut target = UnsafeHandle::<i32>::null();
    let _region = declare_unsafe(&mut handle, "copies");
    let _same_region = declare_unsafe(&mut target, "copies");

    let copy = unsafe { handle.duplicate() };
    assert_eq!(copy.origin_marker(), handle.origin_marker());
    assert_eq!(*copy, 5);

    unsafe { target.assign_from(&handle) };
    assert_eq!(target.get(), handle.get());
    unsafe { free_unsafe(&mut handle) };
}

#[cfg(memsafe_checked)]
#[test]
fn test_regions_are_per_thread() {
    let _region = UnsafeScope::enter("main thread");
    assert_eq!(region_depth(), 1);
    let depth_elsewhere = std::thread::spawn(region_depth).join().unwrap();
    assert_eq!(depth_elsewhere, 0);
}

#[test]
fn test_region_marker_names_enclosing_function() {
    let marker = region_marker!();
    assert!(marker.ends_with("test_region_marker_names_enclosing_function"));
    assert_eq!(marker, region_marker!());
}

#[test]
fn test_failure_mode_parsing() {
    use config::{ConfigError, FailureMode};

    assert_eq!("abort".parse::<FailureMode>(), Ok(FailureMode::Abort));
    assert_eq!(" Panic ".parse::<FailureMode>(), Ok(FailureMode::Panic));
    assert_eq!(
        "explode".parse::<FailureMode>(),
        Err(ConfigError::UnknownMode("explode".to_string()))
    );
    assert_eq!(config::failure_mode(), FailureMode::Panic);
}

const ABORT_CHILD_VAR: &str = "OWNERSHIP_DEBUG_TOOLS_ABORT_CHILD";

/// With the abort failure mode a violation kills the process. The test
/// runs itself again in a child process to observe that.
#[test]
fn test_failure_mode_abort() {
    if std::env::var_os(ABORT_CHILD_VAR).is_some() {
        assert_eq!(config::init_from_env(), Ok(config::FailureMode::Abort));
        let p = SharedHandle::<A>::null();
        let _i = p.i;
        unreachable!("the null dereference aborts the process");
    }

    let output = std::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "test::test_failure_mode_abort",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD_VAR, "1")
        .env(config::ENV_VAR, "abort")
        .output()
        .unwrap();

    assert!(!output.status.success());
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(6));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: try deref null pointer"), "{stderr}");
}

#[test]
fn test_violation_messages() {
    let living = Violation::LiveObjectDestroyed { count: 2 };
    assert_eq!(living.to_string(), "try delete a living pointer (ref count 2)");

    let region: Violation = RegionFault::Mismatch {
        active: RegionMarker::const_from("g"),
        declared: RegionMarker::const_from("f"),
    }
    .into();
    assert_eq!(
        region.to_string(),
        "must declare an unsafe region: active region `g` is not the declaring region `f`"
    );
}

#[derive(Debug, Clone)]
enum Op {
    Capture,
    Clone(usize),
    Assign(usize, usize),
    Clear(usize),
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Capture),
        any::<usize>().prop_map(Op::Clone),
        (any::<usize>(), any::<usize>()).prop_map(|(to, from)| Op::Assign(to, from)),
        any::<usize>().prop_map(Op::Clear),
        any::<usize>().prop_map(Op::Release),
    ]
}

fn apply<T: TrackedObject>(
    handles: &mut Vec<SharedHandle<T>>,
    op: &Op,
    capture: impl FnOnce() -> SharedHandle<T>,
) {
    let len = handles.len();
    match *op {
        Op::Capture => handles.push(capture()),
        _ if len == 0 => {}
        Op::Clone(i) => {
            let copy = handles[i % len].clone();
            handles.push(copy);
        }
        Op::Assign(to, from) => {
            let source = handles[from % len].clone();
            handles[to % len].assign(&source);
        }
        Op::Clear(i) => handles[i % len].assign(&SharedHandle::null()),
        Op::Release(i) => {
            handles.swap_remove(i % len);
        }
    }
}

fn live<T: TrackedObject>(handles: &[SharedHandle<T>]) -> isize {
    handles.iter().filter(|h| !h.is_null()).count() as isize
}

proptest! {
    /// Property: any sequence of captures, copies, assignments and drops
    /// against one stack object leaves the count at the number of live
    /// handles, and at zero once they are all gone.
    #[test]
    fn prop_stack_ref_count_balances(ops in prop::collection::vec(op_strategy(), 0..64)) {
        init_logging();
        let a = A::default();
        let mut handles = Vec::new();
        for op in &ops {
            apply(&mut handles, op, || unsafe {
                SharedHandle::from_ref_with(&a, Nullability::Nullable)
            });
            if CHECKED {
                prop_assert_eq!(a.ref_count(), live(&handles));
            }
        }
        drop(handles);
        prop_assert_eq!(a.ref_count(), 0);
    }

    /// Property: the same holds for a heap object whose owner outlives the
    /// other handles, and the final commit-delete is silent.
    #[test]
    fn prop_heap_ref_count_balances(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let mut owner = SharedHandle::from_option(Some(Box::new(A::default())), Nullability::Nullable);
        let mut handles = Vec::new();
        for op in &ops {
            apply(&mut handles, op, || owner.clone());
            if CHECKED {
                prop_assert_eq!(owner.ref_count(), live(&handles) + 1);
            }
        }
        drop(handles);
        if CHECKED {
            prop_assert_eq!(owner.ref_count(), 1);
        }
        unsafe { commit_delete(&mut owner) };
        prop_assert!(owner.is_null());
    }
}
