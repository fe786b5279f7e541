use super::*;

/// Index of the statement in `stmts` carrying `label`, looking through
/// stacked labels.
fn find_label(stmts: &[&Statement], label: &str) -> Option<usize> {
    stmts.iter().position(|stmt| {
        let mut current = *stmt;
        while let Statement::Labeled(l, body) = current {
            if l == label {
                return true;
            }
            current = &**body;
        }
        false
    })
}

fn continues_loop(comp: &Completion, labels: &[String]) -> bool {
    match comp {
        Completion::Normal(_) | Completion::Continue(None) => true,
        Completion::Continue(Some(l)) => labels.contains(l),
        _ => false,
    }
}

fn breaks_loop(comp: &Completion, labels: &[String]) -> bool {
    match comp {
        Completion::Break(None) => true,
        Completion::Break(Some(l)) => labels.contains(l),
        _ => false,
    }
}

impl Interpreter {
    pub(crate) fn exec_statements(&mut self, stmts: &[Statement], env: &EnvRef) -> Completion {
        let list: Vec<&Statement> = stmts.iter().collect();
        self.exec_list(&list, 0, env)
    }

    /// Executes `stmts` from `start`. A `goto` whose label sits in this list
    /// resumes there; any other abrupt completion ends the list.
    fn exec_list(&mut self, stmts: &[&Statement], start: usize, env: &EnvRef) -> Completion {
        let mut result = Value::Undefined;
        let mut i = start;
        while i < stmts.len() {
            match self.exec_statement(stmts[i], env) {
                Completion::Normal(val) => {
                    result = val;
                    i += 1;
                }
                Completion::Goto(label) => match find_label(stmts, &label) {
                    Some(target) => i = target,
                    None => return Completion::Goto(label),
                },
                other => return other,
            }
        }
        Completion::Normal(result)
    }

    pub(crate) fn exec_statement(&mut self, stmt: &Statement, env: &EnvRef) -> Completion {
        self.exec_labeled(stmt, env, &[])
    }

    fn exec_labeled(&mut self, stmt: &Statement, env: &EnvRef, labels: &[String]) -> Completion {
        if let Err(e) = self.tick() {
            return Completion::Throw(e);
        }
        match stmt {
            Statement::Empty => Completion::Normal(Value::Undefined),
            Statement::Expression(expr) => match self.eval_expr(expr, env) {
                Ok(v) => Completion::Normal(v),
                Err(e) => Completion::Throw(e),
            },
            Statement::Block(stmts) => self.exec_statements(stmts, env),
            Statement::Variable(decl) => self.exec_variable(decl, env),
            Statement::If(if_stmt) => {
                let test = match self.eval_expr(&if_stmt.test, env) {
                    Ok(v) => v,
                    Err(e) => return Completion::Throw(e),
                };
                if test.is_truthy() {
                    self.exec_statement(&if_stmt.consequent, env)
                } else if let Some(alt) = &if_stmt.alternate {
                    self.exec_statement(alt, env)
                } else {
                    Completion::Normal(Value::Undefined)
                }
            }
            Statement::While(w) => self.exec_while(w, env, labels),
            Statement::DoWhile(dw) => self.exec_do_while(dw, env, labels),
            Statement::For(f) => self.exec_for(f, env, labels),
            Statement::ForIn(fi) => self.exec_for_in(fi, env, labels),
            Statement::Return(expr) => {
                let val = match expr {
                    Some(e) => match self.eval_expr(e, env) {
                        Ok(v) => v,
                        Err(e) => return Completion::Throw(e),
                    },
                    None => Value::Undefined,
                };
                Completion::Return(val)
            }
            Statement::Break(label) => Completion::Break(label.clone()),
            Statement::Continue(label) => Completion::Continue(label.clone()),
            Statement::Throw(expr) => match self.eval_expr(expr, env) {
                Ok(v) => Completion::Throw(v),
                Err(e) => Completion::Throw(e),
            },
            Statement::Try(t) => self.exec_try(t, env),
            Statement::Switch(s) => self.exec_switch(s, env),
            Statement::Labeled(label, body) => {
                let mut inner = labels.to_vec();
                inner.push(label.clone());
                match self.exec_labeled(body, env, &inner) {
                    Completion::Break(Some(l)) if l == *label => Completion::Normal(Value::Undefined),
                    other => other,
                }
            }
            Statement::Goto(label) => Completion::Goto(label.clone()),
            Statement::Yield(Some(expr)) => {
                let val = match self.eval_expr(expr, env) {
                    Ok(v) => v,
                    Err(e) => return Completion::Throw(e),
                };
                self.produced.push(val);
                if self.take.is_some_and(|n| self.produced.len() >= n) {
                    Completion::Halt
                } else {
                    Completion::Normal(Value::Undefined)
                }
            }
            Statement::Yield(None) => Completion::Return(Value::Undefined),
            Statement::Await(a) => match self.eval_expr(&a.awaiter, env) {
                Ok(_) => Completion::Normal(Value::Undefined),
                Err(e) => Completion::Throw(e),
            },
            Statement::Jump(_) | Statement::SetNextState(_) => {
                Completion::Throw(Value::string("unresolved state transfer"))
            }
        }
    }

    fn exec_variable(&mut self, decl: &VariableDeclaration, env: &EnvRef) -> Completion {
        let scope = function_scope(env);
        for d in &decl.declarations {
            if !scope.borrow().has_binding(&d.name) {
                scope.borrow_mut().declare(&d.name, Value::Undefined);
            }
            if let Some(init) = &d.init {
                match self.eval_expr(init, env) {
                    Ok(v) => env.borrow_mut().set(&d.name, v),
                    Err(e) => return Completion::Throw(e),
                }
            }
        }
        Completion::Normal(Value::Undefined)
    }

    fn exec_while(&mut self, w: &WhileStatement, env: &EnvRef, labels: &[String]) -> Completion {
        loop {
            match self.eval_expr(&w.test, env) {
                Ok(test) if !test.is_truthy() => break,
                Ok(_) => {}
                Err(e) => return Completion::Throw(e),
            }
            let comp = self.exec_statement(&w.body, env);
            if breaks_loop(&comp, labels) {
                break;
            }
            if !continues_loop(&comp, labels) {
                return comp;
            }
        }
        Completion::Normal(Value::Undefined)
    }

    fn exec_do_while(
        &mut self,
        dw: &DoWhileStatement,
        env: &EnvRef,
        labels: &[String],
    ) -> Completion {
        loop {
            let comp = self.exec_statement(&dw.body, env);
            if breaks_loop(&comp, labels) {
                break;
            }
            if !continues_loop(&comp, labels) {
                return comp;
            }
            match self.eval_expr(&dw.test, env) {
                Ok(test) if !test.is_truthy() => break,
                Ok(_) => {}
                Err(e) => return Completion::Throw(e),
            }
        }
        Completion::Normal(Value::Undefined)
    }

    fn exec_for(&mut self, f: &ForStatement, env: &EnvRef, labels: &[String]) -> Completion {
        match &f.init {
            Some(ForInit::Variable(decl)) => {
                let comp = self.exec_variable(decl, env);
                if comp.is_abrupt() {
                    return comp;
                }
            }
            Some(ForInit::Expression(expr)) => {
                if let Err(e) = self.eval_expr(expr, env) {
                    return Completion::Throw(e);
                }
            }
            None => {}
        }
        loop {
            if let Some(test) = &f.test {
                match self.eval_expr(test, env) {
                    Ok(v) if !v.is_truthy() => break,
                    Ok(_) => {}
                    Err(e) => return Completion::Throw(e),
                }
            }
            let comp = self.exec_statement(&f.body, env);
            if breaks_loop(&comp, labels) {
                break;
            }
            if !continues_loop(&comp, labels) {
                return comp;
            }
            if let Some(update) = &f.update
                && let Err(e) = self.eval_expr(update, env)
            {
                return Completion::Throw(e);
            }
        }
        Completion::Normal(Value::Undefined)
    }

    fn exec_for_in(&mut self, fi: &ForInStatement, env: &EnvRef, labels: &[String]) -> Completion {
        let object = match self.eval_expr(&fi.right, env) {
            Ok(v) => v,
            Err(e) => return Completion::Throw(e),
        };
        // Keys are taken up front.
        let count = match &object {
            Value::Array(items) => items.borrow().len(),
            Value::String(s) => s.chars().count(),
            _ => 0,
        };
        let name = fi.left.name();
        if let ForInLeft::Variable(_) = fi.left {
            let scope = function_scope(env);
            if !scope.borrow().has_binding(name) {
                scope.borrow_mut().declare(name, Value::Undefined);
            }
        }
        for key in 0..count {
            env.borrow_mut().set(name, Value::string(&key.to_string()));
            let comp = self.exec_statement(&fi.body, env);
            if breaks_loop(&comp, labels) {
                break;
            }
            if !continues_loop(&comp, labels) {
                return comp;
            }
        }
        Completion::Normal(Value::Undefined)
    }

    fn exec_try(&mut self, t: &TryStatement, env: &EnvRef) -> Completion {
        let result = match (self.exec_statements(&t.block, env), &t.handler) {
            (Completion::Throw(err), Some(handler)) => {
                let catch_env = Environment::new(Some(env.clone()), false);
                catch_env.borrow_mut().declare(&handler.param, err);
                self.exec_statements(&handler.body, &catch_env)
            }
            (other, _) => other,
        };
        if let Some(finalizer) = &t.finalizer {
            let comp = self.exec_statements(finalizer, env);
            if comp.is_abrupt() {
                return comp;
            }
        }
        result
    }

    fn exec_switch(&mut self, s: &SwitchStatement, env: &EnvRef) -> Completion {
        let discriminant = match self.eval_expr(&s.discriminant, env) {
            Ok(v) => v,
            Err(e) => return Completion::Throw(e),
        };
        let mut matched = None;
        'cases: for (i, case) in s.cases.iter().enumerate() {
            for test in case.tests.iter().flatten() {
                match self.eval_expr(test, env) {
                    Ok(v) if v.strict_equals(&discriminant) => {
                        matched = Some(i);
                        break 'cases;
                    }
                    Ok(_) => {}
                    Err(e) => return Completion::Throw(e),
                }
            }
        }
        let Some(start) = matched.or_else(|| s.cases.iter().position(SwitchCase::is_default)) else {
            return Completion::Normal(Value::Undefined);
        };
        // Clauses fall through, so they run as one list.
        let list: Vec<&Statement> = s.cases.iter().flat_map(|c| c.consequent.iter()).collect();
        let offset = s.cases[..start].iter().map(|c| c.consequent.len()).sum();
        match self.exec_list(&list, offset, env) {
            Completion::Break(None) => Completion::Normal(Value::Undefined),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::interpreter::Interpreter;
    use crate::parser::parse_body;

    fn log_of(source: &str) -> Vec<String> {
        Interpreter::new().run_body(&parse_body(source).unwrap()).log
    }

    #[test]
    fn switch_falls_through_and_breaks() {
        let log = log_of(
            "for (var i = 0; i < 4; i++) switch (i) {\n\
               case 0: log('zero');\n\
               case 1: log('one'); break;\n\
               default: log('other');\n\
             }",
        );
        assert_eq!(log, vec!["zero", "one", "one", "other", "other"]);
    }

    #[test]
    fn do_while_runs_body_first() {
        assert_eq!(log_of("var i = 5; do { log(i); } while (i < 3);"), vec!["5"]);
    }

    #[test]
    fn for_in_walks_indices() {
        assert_eq!(
            log_of("var a = [7, 8]; for (var k in a) log(k, a[k]);"),
            vec!["0 7", "1 8"]
        );
    }

    #[test]
    fn catch_binds_and_finally_always_runs() {
        let log = log_of(
            "try { try { throw 'x'; } finally { log('inner'); } }\n\
             catch (e) { log('caught', e); } finally { log('outer'); }",
        );
        assert_eq!(log, vec!["inner", "caught x", "outer"]);
    }

    #[test]
    fn labeled_block_break() {
        assert_eq!(log_of("a: { log(1); break a; log(2); } log(3);"), vec!["1", "3"]);
    }

    #[test]
    fn goto_into_switch_clause() {
        let log = log_of(
            "switch (1) { case 1: log('one'); goto two; case 2: log('skipped'); two: log('two'); }",
        );
        assert_eq!(log, vec!["one", "two"]);
    }
}
