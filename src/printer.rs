//! Renders statement trees as JavaScript source.

use crate::ast::*;

const INDENT: &str = "    ";

pub fn print_statements(stmts: &[Statement]) -> String {
    let mut printer = Printer::default();
    for stmt in stmts {
        printer.statement(stmt);
    }
    printer.out
}

pub fn print_statement(stmt: &Statement) -> String {
    print_statements(std::slice::from_ref(stmt))
}

pub fn print_expression(expr: &Expression) -> String {
    let mut printer = Printer::default();
    printer.expression(expr, Precedence::Sequence);
    printer.out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Sequence,
    Assignment,
    Conditional,
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equality,
    Relational,
    Additive,
    Multiplicative,
    Unary,
    Postfix,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::Sequence => Precedence::Assignment,
            Precedence::Assignment => Precedence::Conditional,
            Precedence::Conditional => Precedence::LogicalOr,
            Precedence::LogicalOr => Precedence::LogicalAnd,
            Precedence::LogicalAnd => Precedence::BitOr,
            Precedence::BitOr => Precedence::BitXor,
            Precedence::BitXor => Precedence::BitAnd,
            Precedence::BitAnd => Precedence::Equality,
            Precedence::Equality => Precedence::Relational,
            Precedence::Relational => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative => Precedence::Unary,
            Precedence::Unary => Precedence::Postfix,
            Precedence::Postfix => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn binary_info(op: BinaryOp) -> (&'static str, Precedence) {
    match op {
        BinaryOp::Add => ("+", Precedence::Additive),
        BinaryOp::Sub => ("-", Precedence::Additive),
        BinaryOp::Mul => ("*", Precedence::Multiplicative),
        BinaryOp::Div => ("/", Precedence::Multiplicative),
        BinaryOp::Mod => ("%", Precedence::Multiplicative),
        BinaryOp::Eq => ("==", Precedence::Equality),
        BinaryOp::NotEq => ("!=", Precedence::Equality),
        BinaryOp::StrictEq => ("===", Precedence::Equality),
        BinaryOp::StrictNotEq => ("!==", Precedence::Equality),
        BinaryOp::Lt => ("<", Precedence::Relational),
        BinaryOp::Gt => (">", Precedence::Relational),
        BinaryOp::LtEq => ("<=", Precedence::Relational),
        BinaryOp::GtEq => (">=", Precedence::Relational),
        BinaryOp::In => ("in", Precedence::Relational),
        BinaryOp::Instanceof => ("instanceof", Precedence::Relational),
        BinaryOp::BitAnd => ("&", Precedence::BitAnd),
        BinaryOp::BitOr => ("|", Precedence::BitOr),
        BinaryOp::BitXor => ("^", Precedence::BitXor),
    }
}

fn precedence_of(expr: &Expression) -> Precedence {
    match expr {
        Expression::Literal(Literal::Number(n)) if n.is_sign_negative() && *n != 0.0 => {
            Precedence::Unary
        }
        Expression::Literal(_)
        | Expression::Identifier(_)
        | Expression::This
        | Expression::Array(_)
        | Expression::Function(_) => Precedence::Primary,
        Expression::Member(..) | Expression::Call(..) | Expression::New(..) => Precedence::Call,
        Expression::Update(_, false, _) => Precedence::Postfix,
        Expression::Update(_, true, _) | Expression::Unary(..) => Precedence::Unary,
        Expression::Binary(op, ..) => binary_info(*op).1,
        Expression::Logical(LogicalOp::And, ..) => Precedence::LogicalAnd,
        Expression::Logical(LogicalOp::Or, ..) => Precedence::LogicalOr,
        Expression::Conditional(..) => Precedence::Conditional,
        Expression::Assign(..) => Precedence::Assignment,
        Expression::Sequence(_) => Precedence::Sequence,
    }
}

/// Whether an expression statement would start with `function` and be read
/// as a declaration.
fn starts_with_function(expr: &Expression) -> bool {
    match expr {
        Expression::Function(_) => true,
        Expression::Call(callee, _) => starts_with_function(callee),
        Expression::Member(object, _) => starts_with_function(object),
        Expression::Binary(_, left, _)
        | Expression::Logical(_, left, _)
        | Expression::Assign(_, left, _)
        | Expression::Conditional(left, _, _) => starts_with_function(left),
        Expression::Update(_, false, arg) => starts_with_function(arg),
        Expression::Sequence(items) => items.first().is_some_and(starts_with_function),
        _ => false,
    }
}

/// ECMAScript Number::toString, shared by the printer and the evaluator.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return String::from(if n > 0.0 { "Infinity" } else { "-Infinity" });
    }
    let mut buf = ryu_js::Buffer::new();
    buf.format(n).to_string()
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Default)]
struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        self.line_start();
        self.statement_tail(stmt);
    }

    /// Writes `{`, the statements of `body`, and `}` without a newline.
    fn braced(&mut self, body: &[Statement]) {
        self.write("{\n");
        self.indent += 1;
        for stmt in body {
            self.statement(stmt);
        }
        self.indent -= 1;
        self.line_start();
        self.write("}");
    }

    fn braced_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Block(stmts) => self.braced(stmts),
            other => self.braced(std::slice::from_ref(other)),
        }
    }

    fn statement_tail(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Empty => self.write(";\n"),
            Statement::Expression(expr) => {
                if starts_with_function(expr) {
                    self.write("(");
                    self.expression(expr, Precedence::Sequence);
                    self.write(")");
                } else {
                    self.expression(expr, Precedence::Sequence);
                }
                self.write(";\n");
            }
            Statement::Block(stmts) => {
                self.braced(stmts);
                self.write("\n");
            }
            Statement::Variable(decl) => {
                self.declaration(decl);
                self.write(";\n");
            }
            Statement::If(s) => {
                self.if_chain(s);
                self.write("\n");
            }
            Statement::While(s) => {
                self.write("while (");
                self.expression(&s.test, Precedence::Sequence);
                self.write(") ");
                self.braced_statement(&s.body);
                self.write("\n");
            }
            Statement::DoWhile(s) => {
                self.write("do ");
                self.braced_statement(&s.body);
                self.write(" while (");
                self.expression(&s.test, Precedence::Sequence);
                self.write(");\n");
            }
            Statement::For(s) => {
                self.write("for (");
                match &s.init {
                    Some(ForInit::Variable(decl)) => self.declaration(decl),
                    Some(ForInit::Expression(expr)) => self.expression(expr, Precedence::Sequence),
                    None => {}
                }
                self.write(";");
                if let Some(test) = &s.test {
                    self.write(" ");
                    self.expression(test, Precedence::Sequence);
                }
                self.write(";");
                if let Some(update) = &s.update {
                    self.write(" ");
                    self.expression(update, Precedence::Sequence);
                }
                self.write(") ");
                self.braced_statement(&s.body);
                self.write("\n");
            }
            Statement::ForIn(s) => {
                self.write("for (");
                if let ForInLeft::Variable(_) = s.left {
                    self.write("var ");
                }
                self.write(s.left.name());
                self.write(" in ");
                self.expression(&s.right, Precedence::Sequence);
                self.write(") ");
                self.braced_statement(&s.body);
                self.write("\n");
            }
            Statement::Return(value) => self.keyword_with_value("return", value.as_ref()),
            Statement::Break(label) => self.keyword_with_label("break", label.as_deref()),
            Statement::Continue(label) => self.keyword_with_label("continue", label.as_deref()),
            Statement::Throw(expr) => self.keyword_with_value("throw", Some(expr)),
            Statement::Try(s) => {
                self.write("try ");
                self.braced(&s.block);
                if let Some(handler) = &s.handler {
                    self.write(" catch (");
                    self.write(&handler.param);
                    self.write(") ");
                    self.braced(&handler.body);
                }
                if let Some(finalizer) = &s.finalizer {
                    self.write(" finally ");
                    self.braced(finalizer);
                }
                self.write("\n");
            }
            Statement::Switch(s) => {
                self.write("switch (");
                self.expression(&s.discriminant, Precedence::Sequence);
                self.write(") {\n");
                self.indent += 1;
                for case in &s.cases {
                    self.switch_case(case);
                }
                self.indent -= 1;
                self.line_start();
                self.write("}\n");
            }
            Statement::Labeled(label, body) => {
                self.write(label);
                self.write(": ");
                self.statement_tail(body);
            }
            Statement::Goto(label) => self.keyword_with_label("goto", Some(label)),
            Statement::Yield(Some(value)) => self.keyword_with_value("yield return", Some(value)),
            Statement::Yield(None) => self.write("yield break;\n"),
            Statement::Await(s) => {
                self.write("await ");
                self.expression(&s.awaiter, Precedence::Call);
                self.write(":");
                self.write(&s.on_completed);
                self.write(";\n");
            }
            Statement::Jump(jump) => {
                let target = match &jump.target {
                    JumpTarget::State(state) => state.id.to_string(),
                    JumpTarget::Label(label) => label.clone(),
                };
                self.write(&format!("@jump({target});\n"));
            }
            Statement::SetNextState(id) => self.write(&format!("@set_state({id});\n")),
        }
    }

    fn if_chain(&mut self, s: &IfStatement) {
        self.write("if (");
        self.expression(&s.test, Precedence::Sequence);
        self.write(") ");
        self.braced_statement(&s.consequent);
        match s.alternate.as_deref() {
            Some(Statement::If(nested)) => {
                self.write(" else ");
                self.if_chain(nested);
            }
            Some(alternate) => {
                self.write(" else ");
                self.braced_statement(alternate);
            }
            None => {}
        }
    }

    fn switch_case(&mut self, case: &SwitchCase) {
        for (i, test) in case.tests.iter().enumerate() {
            if i > 0 {
                self.write("\n");
            }
            self.line_start();
            match test {
                Some(expr) => {
                    self.write("case ");
                    self.expression(expr, Precedence::Sequence);
                    self.write(":");
                }
                None => self.write("default:"),
            }
        }
        match case.consequent.as_slice() {
            [Statement::Block(stmts)] => {
                self.write(" ");
                self.braced(stmts);
                self.write("\n");
            }
            stmts => {
                self.write("\n");
                self.indent += 1;
                for stmt in stmts {
                    self.statement(stmt);
                }
                self.indent -= 1;
            }
        }
    }

    fn declaration(&mut self, decl: &VariableDeclaration) {
        self.write("var ");
        for (i, d) in decl.declarations.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.write(&d.name);
            if let Some(init) = &d.init {
                self.write(" = ");
                self.expression(init, Precedence::Assignment);
            }
        }
    }

    fn keyword_with_value(&mut self, keyword: &str, value: Option<&Expression>) {
        self.write(keyword);
        if let Some(value) = value {
            self.write(" ");
            self.expression(value, Precedence::Sequence);
        }
        self.write(";\n");
    }

    fn keyword_with_label(&mut self, keyword: &str, label: Option<&str>) {
        self.write(keyword);
        if let Some(label) = label {
            self.write(" ");
            self.write(label);
        }
        self.write(";\n");
    }

    fn arguments(&mut self, args: &[Expression]) {
        self.write("(");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.expression(arg, Precedence::Assignment);
        }
        self.write(")");
    }

    fn expression(&mut self, expr: &Expression, min: Precedence) {
        let own = precedence_of(expr);
        let parens = own < min;
        if parens {
            self.write("(");
        }
        match expr {
            Expression::Literal(literal) => match literal {
                Literal::Null => self.write("null"),
                Literal::Boolean(b) => self.write(if *b { "true" } else { "false" }),
                Literal::Number(n) => self.write(&format_number(*n)),
                Literal::String(s) => self.write(&quote(s)),
            },
            Expression::Identifier(name) => self.write(name),
            Expression::This => self.write("this"),
            Expression::Array(items) => {
                self.write("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.expression(item, Precedence::Assignment);
                }
                self.write("]");
            }
            Expression::Function(f) => self.function(f),
            Expression::Unary(op, arg) => {
                let text = match op {
                    UnaryOp::Minus => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                    UnaryOp::Typeof => "typeof ",
                };
                self.write(text);
                // Keep `- -x` from printing as `--x`.
                if matches!(
                    (op, arg.as_ref()),
                    (UnaryOp::Minus, Expression::Unary(UnaryOp::Minus, _))
                        | (UnaryOp::Plus, Expression::Unary(UnaryOp::Plus, _))
                ) {
                    self.write(" ");
                }
                self.expression(arg, Precedence::Unary);
            }
            Expression::Binary(op, left, right) => {
                let (text, prec) = binary_info(*op);
                self.expression(left, prec);
                self.write(" ");
                self.write(text);
                self.write(" ");
                self.expression(right, prec.next());
            }
            Expression::Logical(op, left, right) => {
                let text = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                self.expression(left, own);
                self.write(" ");
                self.write(text);
                self.write(" ");
                self.expression(right, own.next());
            }
            Expression::Update(op, prefix, arg) => {
                let text = match op {
                    UpdateOp::Increment => "++",
                    UpdateOp::Decrement => "--",
                };
                if *prefix {
                    self.write(text);
                    self.expression(arg, Precedence::Unary);
                } else {
                    self.expression(arg, Precedence::Call);
                    self.write(text);
                }
            }
            Expression::Assign(op, target, value) => {
                let text = match op {
                    AssignOp::Assign => "=",
                    AssignOp::AddAssign => "+=",
                    AssignOp::SubAssign => "-=",
                    AssignOp::MulAssign => "*=",
                };
                self.expression(target, Precedence::Call);
                self.write(" ");
                self.write(text);
                self.write(" ");
                self.expression(value, Precedence::Assignment);
            }
            Expression::Conditional(test, consequent, alternate) => {
                self.expression(test, Precedence::LogicalOr);
                self.write(" ? ");
                self.expression(consequent, Precedence::Assignment);
                self.write(" : ");
                self.expression(alternate, Precedence::Assignment);
            }
            Expression::Call(callee, args) => {
                self.expression(callee, Precedence::Call);
                self.arguments(args);
            }
            Expression::New(callee, args) => {
                self.write("new ");
                self.expression(callee, Precedence::Primary);
                self.arguments(args);
            }
            Expression::Member(object, property) => {
                self.expression(object, Precedence::Call);
                match property {
                    MemberProperty::Dot(name) => {
                        self.write(".");
                        self.write(name);
                    }
                    MemberProperty::Computed(index) => {
                        self.write("[");
                        self.expression(index, Precedence::Sequence);
                        self.write("]");
                    }
                }
            }
            Expression::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.expression(item, Precedence::Assignment);
                }
            }
        }
        if parens {
            self.write(")");
        }
    }

    fn function(&mut self, f: &FunctionExpr) {
        match f.kind {
            FunctionKind::Normal => self.write("function"),
            FunctionKind::Iterator => self.write("function*"),
            FunctionKind::Async => self.write("async function"),
        }
        if let Some(name) = &f.name {
            self.write(" ");
            self.write(name);
        }
        self.write("(");
        self.write(&f.params.join(", "));
        self.write(") ");
        self.braced(&f.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_body;

    fn round_trip(src: &str) -> String {
        print_statements(&parse_body(src).unwrap())
    }

    #[test]
    fn expressions_keep_needed_parentheses() {
        assert_eq!(round_trip("(a + b) * c;"), "(a + b) * c;\n");
        assert_eq!(round_trip("a - (b - c);"), "a - (b - c);\n");
        assert_eq!(round_trip("!(a && b) || c;"), "!(a && b) || c;\n");
        assert_eq!(round_trip("x = y = f(1, [2, 3])[0].z;"), "x = y = f(1, [2, 3])[0].z;\n");
        assert_eq!(round_trip("(function() {})();"), "(function() {\n}());\n");
    }

    #[test]
    fn numbers_print_like_javascript() {
        assert_eq!(format_number(-1.0), "-1");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1e-7), "1e-7");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(123456789012345680000.0), "123456789012345680000");
    }

    #[test]
    fn switch_groups_labels() {
        let code = round_trip("switch (x) { case 1: case 2: a; break; default: b; }");
        assert_eq!(
            code,
            "switch (x) {\n    case 1:\n    case 2:\n        a;\n        break;\n    default:\n        b;\n}\n"
        );
    }

    #[test]
    fn fixture_statements() {
        let code = round_trip("lbl: x; goto lbl; yield return 1; yield break; await t:onCompleted;");
        assert_eq!(
            code,
            "lbl: x;\ngoto lbl;\nyield return 1;\nyield break;\nawait t:onCompleted;\n"
        );
    }

    #[test]
    fn else_if_chains_stay_flat() {
        let code = round_trip("if (a) b; else if (c) d; else e;");
        assert_eq!(code, "if (a) {\n    b;\n} else if (c) {\n    d;\n} else {\n    e;\n}\n");
    }
}
