use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::executor::symbolic_value::substitute_placeholder;
use crate::ir::expression::ExprRef;
use crate::ir::program::PipelineBlock;
use crate::ir::statement::{Statement, StmtRef};

/// Exceptions raised while interpreting a program. They unwind the frame
/// stack until a frame with a matching handler is found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExceptionKind {
    Exit,
    Reject,
    NoMatch,
    Drop,
    Abort,
    PacketTooShort,
    StackOutOfBounds,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExceptionKind::Exit => "Exit",
            ExceptionKind::Reject => "Reject",
            ExceptionKind::NoMatch => "NoMatch",
            ExceptionKind::Drop => "Drop",
            ExceptionKind::Abort => "Abort",
            ExceptionKind::PacketTooShort => "PacketTooShort",
            ExceptionKind::StackOutOfBounds => "StackOutOfBounds",
        };
        write!(f, "{}", s)
    }
}

/// Scalar values stored in the state's property map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    UInt(u64),
    Str(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::UInt(u) => write!(f, "{}", u),
            PropertyValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// One unit of pending work.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Statement(StmtRef),
    /// Evaluate an expression and hand its value to the innermost frame.
    Expression(ExprRef),
    Return(Option<ExprRef>),
    Exception(ExceptionKind),
    PropertyUpdate { key: String, value: PropertyValue },
    /// Run a parser or control of the pipeline.
    Invoke(PipelineBlock),
    /// Enter the named state of the parser on top of the namespace stack.
    ParserState(String),
}

impl Command {
    /// Substitutes continuation placeholder `id` with `value` in the
    /// expressions this command carries.
    pub fn substitute(&self, id: u64, value: &ExprRef) -> Command {
        match self {
            Command::Statement(s) => Command::Statement(substitute_in_statement(s, id, value)),
            Command::Expression(e) => Command::Expression(substitute_placeholder(e, id, value)),
            Command::Return(Some(e)) => Command::Return(Some(substitute_placeholder(e, id, value))),
            other => other.clone(),
        }
    }
}

/// Placeholders only ever occur in the statement being rebuilt, never in
/// nested bodies, so only the statement's own expressions are visited.
fn substitute_in_statement(stmt: &StmtRef, id: u64, value: &ExprRef) -> StmtRef {
    let sub = |e: &ExprRef| substitute_placeholder(e, id, value);
    let rebuilt = match stmt.as_ref() {
        Statement::Assignment { meta, left, right } => Statement::Assignment {
            meta: *meta,
            left: sub(left),
            right: sub(right),
        },
        Statement::MethodCall { meta, call } => Statement::MethodCall {
            meta: *meta,
            call: sub(call),
        },
        Statement::If {
            meta,
            cond,
            if_true,
            if_false,
        } => Statement::If {
            meta: *meta,
            cond: sub(cond),
            if_true: Rc::clone(if_true),
            if_false: if_false.clone(),
        },
        Statement::Switch { meta, expr, cases } => Statement::Switch {
            meta: *meta,
            expr: sub(expr),
            cases: cases.clone(),
        },
        Statement::Return { meta, expr } => Statement::Return {
            meta: *meta,
            expr: expr.as_ref().map(sub),
        },
        Statement::Declaration {
            meta,
            name,
            ty,
            init,
        } => Statement::Declaration {
            meta: *meta,
            name: name.clone(),
            ty: ty.clone(),
            init: init.as_ref().map(sub),
        },
        Statement::Transition { meta, target } => Statement::Transition {
            meta: *meta,
            target: sub(target),
        },
        _ => return Rc::clone(stmt),
    };
    Rc::new(rebuilt)
}

/// A persistent list of commands. Cloning shares the tail.
#[derive(Clone, Debug, Default)]
pub struct Body {
    head: Option<Rc<BodyNode>>,
    len: usize,
}

#[derive(Debug)]
struct BodyNode {
    command: Command,
    next: Option<Rc<BodyNode>>,
}

impl Body {
    pub fn new() -> Self {
        Body::default()
    }

    pub fn from_commands(commands: Vec<Command>) -> Self {
        Body::new().prepend(commands)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn top(&self) -> Option<&Command> {
        self.head.as_ref().map(|n| &n.command)
    }

    pub fn push_front(&self, command: Command) -> Body {
        Body {
            head: Some(Rc::new(BodyNode {
                command,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Returns the body without its first command.
    pub fn tail(&self) -> Body {
        match &self.head {
            Some(node) => Body {
                head: node.next.clone(),
                len: self.len - 1,
            },
            None => Body::new(),
        }
    }

    /// Prepends `commands`, keeping their order.
    pub fn prepend(&self, commands: Vec<Command>) -> Body {
        commands
            .into_iter()
            .rev()
            .fold(self.clone(), |acc, c| acc.push_front(c))
    }

    pub fn iter(&self) -> BodyIter<'_> {
        BodyIter {
            node: self.head.as_deref(),
        }
    }

    /// Replaces the placeholder in the first command, which is the one a
    /// frame was suspended on.
    pub fn substitute_top(&self, id: u64, value: &ExprRef) -> Body {
        match self.top() {
            Some(c) => self.tail().push_front(c.substitute(id, value)),
            None => self.clone(),
        }
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

pub struct BodyIter<'a> {
    node: Option<&'a BodyNode>,
}

impl<'a> Iterator for BodyIter<'a> {
    type Item = &'a Command;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        self.node = node.next.as_deref();
        Some(&node.command)
    }
}

/// A suspended continuation waiting for a value or an exception.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub body: Body,
    /// Placeholder that receives the value handed back by the callee.
    pub parameter: Option<u64>,
    /// Namespace stack to restore on resumption.
    pub namespaces: Rc<Vec<String>>,
    pub handlers: Rc<BTreeMap<ExceptionKind, Body>>,
}

impl Frame {
    pub fn new(body: Body, parameter: Option<u64>, namespaces: Rc<Vec<String>>) -> Self {
        Frame {
            body,
            parameter,
            namespaces,
            handlers: Rc::new(BTreeMap::new()),
        }
    }

    pub fn with_handler(mut self, kind: ExceptionKind, handler: Body) -> Self {
        Rc::make_mut(&mut self.handlers).insert(kind, handler);
        self
    }
}

/// Persistent stack of frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStack {
    frames: Rc<Vec<Rc<Frame>>>,
}

impl FrameStack {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: Frame) {
        Rc::make_mut(&mut self.frames).push(Rc::new(frame));
    }

    pub fn pop(&mut self) -> Option<Rc<Frame>> {
        if self.frames.is_empty() {
            return None;
        }
        Rc::make_mut(&mut self.frames).pop()
    }

    /// Frames from innermost to outermost.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Frame>> {
        self.frames.iter().rev()
    }
}
