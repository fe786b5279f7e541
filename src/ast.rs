/// Statement tree for one function body.
/// Covers the structured input forms (`goto`, suspension points) as well as
/// the instructions the lowering pass uses internally before finalization.
use crate::lower::state::State;

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Empty,
    Expression(Expression),
    Block(Vec<Statement>),
    Variable(VariableDeclaration),
    If(IfStatement),
    While(WhileStatement),
    DoWhile(DoWhileStatement),
    For(ForStatement),
    ForIn(ForInStatement),
    Return(Option<Expression>),
    Break(Option<String>),
    Continue(Option<String>),
    Throw(Expression),
    Try(TryStatement),
    Switch(SwitchStatement),
    Labeled(String, Box<Statement>),
    Goto(String),
    /// `yield return value;`, or `yield break;` when the value is absent.
    Yield(Option<Expression>),
    Await(AwaitStatement),
    /// Pending transfer to another dispatch state, resolved by the finalizer.
    Jump(Jump),
    /// Pending assignment of the state variable, resolved by the finalizer.
    SetNextState(i32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDeclaration {
    pub declarations: Vec<VariableDeclarator>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDeclarator {
    pub name: String,
    pub init: Option<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Identifier(String),
    This,
    Array(Vec<Expression>),
    Function(FunctionExpr),
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
    Logical(LogicalOp, Box<Expression>, Box<Expression>),
    Update(UpdateOp, bool, Box<Expression>), // op, prefix, argument
    Assign(AssignOp, Box<Expression>, Box<Expression>),
    Conditional(Box<Expression>, Box<Expression>, Box<Expression>),
    Call(Box<Expression>, Vec<Expression>),
    New(Box<Expression>, Vec<Expression>),
    Member(Box<Expression>, MemberProperty),
    Sequence(Vec<Expression>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum MemberProperty {
    Dot(String),
    Computed(Box<Expression>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
    Typeof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    In,
    Instanceof,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStatement {
    pub test: Expression,
    pub consequent: Box<Statement>,
    pub alternate: Option<Box<Statement>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStatement {
    pub test: Expression,
    pub body: Box<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DoWhileStatement {
    pub test: Expression,
    pub body: Box<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForStatement {
    pub init: Option<ForInit>,
    pub test: Option<Expression>,
    pub update: Option<Expression>,
    pub body: Box<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ForInit {
    Variable(VariableDeclaration),
    Expression(Expression),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForInStatement {
    pub left: ForInLeft,
    pub right: Expression,
    pub body: Box<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ForInLeft {
    /// `for (var name in ...)`
    Variable(String),
    /// `for (name in ...)`
    Identifier(String),
}

impl ForInLeft {
    pub fn name(&self) -> &str {
        match self {
            ForInLeft::Variable(name) | ForInLeft::Identifier(name) => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TryStatement {
    pub block: Vec<Statement>,
    pub handler: Option<CatchClause>,
    pub finalizer: Option<Vec<Statement>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    pub param: String,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchStatement {
    pub discriminant: Expression,
    pub cases: Vec<SwitchCase>,
}

/// One clause of a switch with its grouped labels; `None` is `default`.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    pub tests: Vec<Option<Expression>>,
    pub consequent: Vec<Statement>,
}

impl SwitchCase {
    pub fn is_default(&self) -> bool {
        self.tests.iter().any(Option::is_none)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AwaitStatement {
    pub awaiter: Expression,
    /// Method invoked on the awaiter to register the continuation.
    pub on_completed: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Normal,
    Iterator,
    Async,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionExpr {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    pub kind: FunctionKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Jump {
    pub target: JumpTarget,
    /// State whose section emitted the jump.
    pub origin: State,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JumpTarget {
    State(State),
    /// A `goto` whose label may not have a state yet.
    Label(String),
}

impl Statement {
    /// Splices a block into its statements; anything else becomes a singleton.
    pub fn into_statements(self) -> Vec<Statement> {
        match self {
            Statement::Block(stmts) => stmts,
            other => vec![other],
        }
    }
}

impl Expression {
    pub fn ident(name: impl Into<String>) -> Expression {
        Expression::Identifier(name.into())
    }

    pub fn number(value: f64) -> Expression {
        Expression::Literal(Literal::Number(value))
    }

    pub fn boolean(value: bool) -> Expression {
        Expression::Literal(Literal::Boolean(value))
    }

    pub fn assign(target: Expression, value: Expression) -> Expression {
        Expression::Assign(AssignOp::Assign, Box::new(target), Box::new(value))
    }

    pub fn member(object: Expression, name: impl Into<String>) -> Expression {
        Expression::Member(Box::new(object), MemberProperty::Dot(name.into()))
    }

    pub fn call(callee: Expression, args: Vec<Expression>) -> Expression {
        Expression::Call(Box::new(callee), args)
    }

    pub fn method_call(object: Expression, name: &str, args: Vec<Expression>) -> Expression {
        Expression::call(Expression::member(object, name), args)
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn not(expr: Expression) -> Expression {
        Expression::Unary(UnaryOp::Not, Box::new(expr))
    }

    pub fn is_true_literal(&self) -> bool {
        matches!(self, Expression::Literal(Literal::Boolean(true)))
    }
}
