//! Renames labels so that no two labeled statements in a body share a name.
//! Sibling blocks may reuse a label; the splitter binds one state per name.

use rustc_hash::{FxHashMap, FxHashSet};

use super::analysis::any_in;
use crate::ast::Statement;

struct Renamer {
    /// Every label name in the body, plus the names handed out so far.
    taken: FxHashSet<String>,
    /// Names already bound to a labeled statement.
    claimed: FxHashSet<String>,
    scopes: Vec<FxHashMap<String, String>>,
}

/// Gives every repeated label a fresh `name_N` and retargets the `break`,
/// `continue` and `goto` statements that refer to it. Function literals
/// are not entered.
pub(super) fn make_labels_unique(body: &mut [Statement]) {
    let mut taken = FxHashSet::default();
    any_in(body, &mut |stmt| {
        if let Statement::Labeled(label, _) = stmt {
            taken.insert(label.clone());
        }
        false
    });
    let mut renamer = Renamer {
        taken,
        claimed: FxHashSet::default(),
        scopes: Vec::new(),
    };
    renamer.scope(body.iter_mut());
}

impl Renamer {
    fn fresh(&mut self, label: &str) -> String {
        if self.claimed.insert(label.to_string()) {
            return label.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{label}_{n}");
            if self.taken.insert(candidate.clone()) {
                self.claimed.insert(candidate.clone());
                return candidate;
            }
            n += 1;
        }
    }

    /// Binds the labels stacked on `stmt` in `names`.
    fn bind(&mut self, stmt: &mut Statement, names: &mut FxHashMap<String, String>) {
        let mut current = stmt;
        while let Statement::Labeled(label, body) = current {
            let renamed = self.fresh(label);
            names.insert(label.clone(), renamed.clone());
            *label = renamed;
            current = &mut **body;
        }
    }

    /// A statement list: its labels are visible to every statement in it.
    fn scope<'s>(&mut self, stmts: impl IntoIterator<Item = &'s mut Statement>) {
        let mut stmts: Vec<&mut Statement> = stmts.into_iter().collect();
        let mut names = FxHashMap::default();
        for stmt in stmts.iter_mut() {
            self.bind(stmt, &mut names);
        }
        self.scopes.push(names);
        for stmt in stmts {
            self.visit(stmt);
        }
        self.scopes.pop();
    }

    fn single(&mut self, stmt: &mut Statement) {
        self.scope(std::iter::once(stmt));
    }

    fn retarget(&self, label: &mut String) {
        let renamed = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(label.as_str()));
        if let Some(renamed) = renamed {
            *label = renamed.clone();
        }
    }

    fn visit(&mut self, stmt: &mut Statement) {
        match stmt {
            Statement::Labeled(_, body) => self.visit(body),
            Statement::Block(stmts) => self.scope(stmts.iter_mut()),
            Statement::If(s) => {
                self.single(&mut s.consequent);
                if let Some(alternate) = &mut s.alternate {
                    self.single(alternate);
                }
            }
            Statement::While(s) => self.single(&mut s.body),
            Statement::DoWhile(s) => self.single(&mut s.body),
            Statement::For(s) => self.single(&mut s.body),
            Statement::ForIn(s) => self.single(&mut s.body),
            Statement::Try(s) => {
                self.scope(s.block.iter_mut());
                if let Some(handler) = &mut s.handler {
                    self.scope(handler.body.iter_mut());
                }
                if let Some(finalizer) = &mut s.finalizer {
                    self.scope(finalizer.iter_mut());
                }
            }
            Statement::Switch(s) => {
                self.scope(s.cases.iter_mut().flat_map(|case| case.consequent.iter_mut()))
            }
            Statement::Break(Some(label))
            | Statement::Continue(Some(label))
            | Statement::Goto(label) => self.retarget(label),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_body;

    fn unique(src: &str) -> Vec<Statement> {
        let mut body = parse_body(src).unwrap();
        make_labels_unique(&mut body);
        body
    }

    #[test]
    fn sibling_blocks_get_distinct_labels() {
        assert_eq!(
            unique("{ l: a; } { l: b; goto l; }"),
            parse_body("{ l: a; } { l_1: b; goto l_1; }").unwrap()
        );
    }

    #[test]
    fn generated_names_skip_existing_labels() {
        assert_eq!(
            unique("{ l: a; } { l: b; } l_1: c; goto l_1;"),
            parse_body("{ l: a; } { l_2: b; } l_1: c; goto l_1;").unwrap()
        );
    }

    #[test]
    fn loop_jumps_follow_their_label() {
        assert_eq!(
            unique("l: while (x) { break l; }\nl: while (y) { if (z) continue l; }"),
            parse_body("l: while (x) { break l; }\nl_1: while (y) { if (z) continue l_1; }").unwrap()
        );
    }

    #[test]
    fn unique_labels_and_functions_are_left_alone() {
        let src = "top: a; { inner: b; goto top; } var f = function() { top: c; goto top; };";
        assert_eq!(unique(src), parse_body(src).unwrap());
    }
}
