//! Data model shared by the lowering passes: dispatch states, persistent
//! stacks, cursors into statement lists and pending work items.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::ast::Statement;

/// Immutable singly linked stack; `push` and `pop` share the tail.
pub struct Stack<T> {
    head: Option<Rc<Node<T>>>,
    len: usize,
}

struct Node<T> {
    value: T,
    next: Option<Rc<Node<T>>>,
}

impl<T> Stack<T> {
    pub fn new() -> Self {
        Stack { head: None, len: 0 }
    }

    pub fn push(&self, value: T) -> Self {
        Stack {
            head: Some(Rc::new(Node {
                value,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn peek(&self) -> Option<&T> {
        self.head.as_deref().map(|node| &node.value)
    }

    /// Top value and the stack below it.
    pub fn pop(&self) -> Option<(&T, Self)> {
        self.head.as_deref().map(|node| {
            let rest = Stack {
                head: node.next.clone(),
                len: self.len - 1,
            };
            (&node.value, rest)
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates from the top of the stack down.
    pub fn iter(&self) -> StackIter<'_, T> {
        StackIter {
            next: self.head.as_deref(),
        }
    }
}

impl<T> Clone for Stack<T> {
    fn clone(&self) -> Self {
        Stack {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq> PartialEq for Stack<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

pub struct StackIter<'a, T> {
    next: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for StackIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = self.next?;
        self.next = node.next.as_deref();
        Some(&node.value)
    }
}

/// A `finally` region still owed when control leaves a state abnormally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinallyFrame {
    /// Id of the state that entered the guarded region.
    pub state_id: i32,
    pub handler: Rc<str>,
}

/// One dispatch case. Compared and hashed by id only.
#[derive(Clone)]
pub struct State {
    pub id: i32,
    pub loop_label: Rc<str>,
    pub finally_stack: Stack<FinallyFrame>,
}

impl State {
    pub const EXIT_ID: i32 = -1;

    /// The terminal state of the dispatch loop labelled `loop_label`.
    pub fn exit(loop_label: Rc<str>, finally_stack: Stack<FinallyFrame>) -> State {
        State {
            id: Self::EXIT_ID,
            loop_label,
            finally_stack,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.id == Self::EXIT_ID
    }

    /// Frames from the outermost region inwards.
    pub fn frames_outer_to_inner(&self) -> Vec<&FinallyFrame> {
        let mut frames: Vec<_> = self.finally_stack.iter().collect();
        frames.reverse();
        frames
    }

    pub fn handler_names(&self) -> Vec<Rc<str>> {
        self.frames_outer_to_inner()
            .into_iter()
            .map(|frame| frame.handler.clone())
            .collect()
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "State({} in {}", self.id, self.loop_label)?;
        for frame in self.frames_outer_to_inner() {
            write!(f, ", {}@{}", frame.handler, frame.state_id)?;
        }
        write!(f, ")")
    }
}

/// "Resume at this statement."
#[derive(Clone)]
pub struct Cursor {
    pub block: Rc<[Statement]>,
    pub index: usize,
    /// The `for` at this position already emitted its initializer, and its
    /// labels were already bound.
    pub after_loop_initializer: bool,
}

impl Cursor {
    /// `None` for an empty block, since a cursor always points at a statement.
    pub fn start(block: impl Into<Rc<[Statement]>>) -> Option<Cursor> {
        let block = block.into();
        (!block.is_empty()).then_some(Cursor {
            block,
            index: 0,
            after_loop_initializer: false,
        })
    }

    pub fn statement(&self) -> &Statement {
        &self.block[self.index]
    }

    /// The following statement in the same block.
    pub fn next(&self) -> Option<Cursor> {
        (self.index + 1 < self.block.len()).then(|| Cursor {
            block: self.block.clone(),
            index: self.index + 1,
            after_loop_initializer: false,
        })
    }

    pub fn with_loop_initializer_done(&self) -> Cursor {
        Cursor {
            after_loop_initializer: true,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({}/{})", self.index, self.block.len())
    }
}

/// Pushes a cursor over `block` when it has statements.
pub fn push_block(stack: &Stack<Cursor>, block: impl Into<Rc<[Statement]>>) -> Stack<Cursor> {
    match Cursor::start(block) {
        Some(cursor) => stack.push(cursor),
        None => stack.clone(),
    }
}

/// Destination of an unlabeled or labeled `break`/`continue`.
#[derive(Clone, Debug)]
pub struct BranchTarget {
    pub label: Option<Rc<str>>,
    pub state: State,
    /// Loops and switches accept unlabeled branches; labeled blocks do not.
    pub accepts_unlabeled: bool,
}

impl BranchTarget {
    pub fn new(label: Option<&str>, state: State) -> Self {
        BranchTarget {
            label: label.map(Rc::from),
            state,
            accepts_unlabeled: true,
        }
    }

    pub fn labeled_only(label: &str, state: State) -> Self {
        BranchTarget {
            label: Some(Rc::from(label)),
            state,
            accepts_unlabeled: false,
        }
    }
}

/// Finds the target of a branch: innermost unlabeled-capable entry, or the
/// entry carrying `label`.
pub fn find_target<'a>(targets: &'a Stack<BranchTarget>, label: Option<&str>) -> Option<&'a State> {
    targets
        .iter()
        .find(|target| match label {
            None => target.accepts_unlabeled,
            Some(label) => target.label.as_deref() == Some(label),
        })
        .map(|target| &target.state)
}

/// Pending unit of work that becomes one section.
#[derive(Clone, Debug)]
pub struct RemainingBlock {
    pub stack: Stack<Cursor>,
    pub break_targets: Stack<BranchTarget>,
    pub continue_targets: Stack<BranchTarget>,
    pub state: State,
    pub fallthrough_state: State,
}

/// A finished dispatch case.
#[derive(Clone, Debug)]
pub struct Section {
    pub state: State,
    pub statements: Vec<Statement>,
    /// Ids of the nested dispatch loop entered at the start of this section.
    pub nested_states: Vec<i32>,
}

impl Section {
    /// Every id that must dispatch into this section.
    pub fn case_ids(&self) -> Vec<i32> {
        let mut ids = vec![self.state.id];
        for &id in &self.nested_states {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: i32) -> State {
        State {
            id,
            loop_label: Rc::from("$loop1"),
            finally_stack: Stack::new(),
        }
    }

    #[test]
    fn stack_push_shares_tail() {
        let base = Stack::new().push(1).push(2);
        let left = base.push(3);
        let right = base.push(4);
        assert_eq!(left.iter().copied().collect::<Vec<_>>(), vec![3, 2, 1]);
        assert_eq!(right.iter().copied().collect::<Vec<_>>(), vec![4, 2, 1]);
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn stack_pop_leaves_original() {
        let stack = Stack::new().push("a").push("b");
        let (top, rest) = stack.pop().unwrap();
        assert_eq!(*top, "b");
        assert_eq!(rest.peek(), Some(&"a"));
        assert_eq!(stack.len(), 2);
        assert!(Stack::<i32>::new().pop().is_none());
    }

    #[test]
    fn state_equality_ignores_label_and_frames() {
        let mut other = state(3);
        other.loop_label = Rc::from("$loop2");
        other.finally_stack = Stack::new().push(FinallyFrame {
            state_id: 3,
            handler: Rc::from("$finally1"),
        });
        assert_eq!(state(3), other);
        assert_ne!(state(3), state(4));
        assert!(State::exit(Rc::from("$loop1"), Stack::new()).is_exit());
    }

    #[test]
    fn cursor_walks_block() {
        let block = vec![Statement::Empty, Statement::Break(None)];
        let cursor = Cursor::start(block).unwrap();
        assert_eq!(cursor.statement(), &Statement::Empty);
        let next = cursor.next().unwrap();
        assert_eq!(next.statement(), &Statement::Break(None));
        assert!(next.next().is_none());
        assert!(Cursor::start(Vec::<Statement>::new()).is_none());
    }

    #[test]
    fn find_target_skips_labeled_only_entries() {
        let targets = Stack::new()
            .push(BranchTarget::new(None, state(1)))
            .push(BranchTarget::labeled_only("outer", state(2)));
        assert_eq!(find_target(&targets, None), Some(&state(1)));
        assert_eq!(find_target(&targets, Some("outer")), Some(&state(2)));
        assert_eq!(find_target(&targets, Some("missing")), None);
    }

    #[test]
    fn section_case_ids_deduplicate_entry() {
        let section = Section {
            state: state(2),
            statements: Vec::new(),
            nested_states: vec![2, 5, 6],
        };
        assert_eq!(section.case_ids(), vec![2, 5, 6]);
    }
}
