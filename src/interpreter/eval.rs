use super::*;

fn type_error(message: impl std::fmt::Display) -> Value {
    Value::string(&format!("TypeError: {message}"))
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_primitive_for_add(v: &Value) -> bool {
    matches!(
        v,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_)
    )
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Gt => a > b,
            BinaryOp::LtEq => a <= b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::LtEq => a <= b,
        _ => a >= b,
    }
}

pub(crate) fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Value> {
    let value = match op {
        BinaryOp::Add => {
            if is_primitive_for_add(left) && is_primitive_for_add(right) {
                Value::Number(left.to_number() + right.to_number())
            } else {
                Value::string(&format!("{left}{right}"))
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Mod => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
            Value::Bool(compare(op, left, right))
        }
        BinaryOp::BitAnd => Value::Number(f64::from(left.to_int32() & right.to_int32())),
        BinaryOp::BitOr => Value::Number(f64::from(left.to_int32() | right.to_int32())),
        BinaryOp::BitXor => Value::Number(f64::from(left.to_int32() ^ right.to_int32())),
        BinaryOp::In => match right {
            Value::Array(items) => Value::Bool(
                array_index(left).is_some_and(|i| i < items.borrow().len())
                    || matches!(left, Value::String(s) if &**s == "length"),
            ),
            Value::CompletionSource(_) => {
                Value::Bool(matches!(left, Value::String(s) if &**s == "task"))
            }
            other => return Err(type_error(format!("cannot use 'in' on {other}"))),
        },
        BinaryOp::Instanceof => Value::Bool(false),
    };
    Ok(value)
}

impl Interpreter {
    pub(crate) fn eval_expr(&mut self, expr: &Expression, env: &EnvRef) -> Result<Value, Value> {
        match expr {
            Expression::Literal(lit) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Boolean(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::string(s),
            }),
            Expression::Identifier(name) => self.lookup(name, env),
            Expression::This => Ok(Value::Undefined),
            Expression::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, env)?);
                }
                Ok(Value::array(values))
            }
            Expression::Function(function) => Ok(Value::Function(Rc::new(Closure {
                function: function.clone(),
                env: env.clone(),
            }))),
            Expression::Unary(op, operand) => {
                if *op == UnaryOp::Typeof
                    && let Expression::Identifier(name) = &**operand
                    && env.borrow().get(name).is_none()
                {
                    return Ok(Value::string("undefined"));
                }
                let v = self.eval_expr(operand, env)?;
                Ok(match op {
                    UnaryOp::Minus => Value::Number(-v.to_number()),
                    UnaryOp::Plus => Value::Number(v.to_number()),
                    UnaryOp::Not => Value::Bool(!v.is_truthy()),
                    UnaryOp::BitNot => Value::Number(f64::from(!v.to_int32())),
                    UnaryOp::Typeof => Value::string(v.type_of()),
                })
            }
            Expression::Binary(op, left, right) => {
                let l = self.eval_expr(left, env)?;
                let r = self.eval_expr(right, env)?;
                binary_op(*op, &l, &r)
            }
            Expression::Logical(op, left, right) => {
                let l = self.eval_expr(left, env)?;
                match (op, l.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(l),
                    _ => self.eval_expr(right, env),
                }
            }
            Expression::Update(op, prefix, target) => {
                let old = self.eval_expr(target, env)?.to_number();
                let new = match op {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.assign_to(target, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expression::Assign(op, target, value) => {
                let v = match op {
                    AssignOp::Assign => self.eval_expr(value, env)?,
                    compound => {
                        let old = self.eval_expr(target, env)?;
                        let rhs = self.eval_expr(value, env)?;
                        let bin = match compound {
                            AssignOp::AddAssign => BinaryOp::Add,
                            AssignOp::SubAssign => BinaryOp::Sub,
                            _ => BinaryOp::Mul,
                        };
                        binary_op(bin, &old, &rhs)?
                    }
                };
                self.assign_to(target, v.clone(), env)?;
                Ok(v)
            }
            Expression::Conditional(test, consequent, alternate) => {
                if self.eval_expr(test, env)?.is_truthy() {
                    self.eval_expr(consequent, env)
                } else {
                    self.eval_expr(alternate, env)
                }
            }
            Expression::Call(callee, args) => {
                if let Expression::Member(object, property) = &**callee {
                    let this = self.eval_expr(object, env)?;
                    let key = self.property_key(property, env)?;
                    let args = self.eval_arguments(args, env)?;
                    return self.call_method(this, &key, args);
                }
                let function = self.eval_expr(callee, env)?;
                let args = self.eval_arguments(args, env)?;
                self.call_value(&function, Value::Undefined, args)
            }
            Expression::New(callee, args) => {
                let constructor = self.eval_expr(callee, env)?;
                self.eval_arguments(args, env)?;
                match constructor {
                    Value::Builtin(Builtin::TaskCompletionSource) => Ok(Value::CompletionSource(
                        Rc::new(RefCell::new(TaskState::Pending)),
                    )),
                    other => Err(type_error(format!("{other} is not a constructor"))),
                }
            }
            Expression::Member(object, property) => {
                let object = self.eval_expr(object, env)?;
                let key = self.property_key(property, env)?;
                self.get_property(&object, &key)
            }
            Expression::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval_expr(item, env)?;
                }
                Ok(last)
            }
        }
    }

    fn lookup(&self, name: &str, env: &EnvRef) -> Result<Value, Value> {
        match env.borrow().get(name) {
            Some(v) => Ok(v),
            None if name == "undefined" => Ok(Value::Undefined),
            None => Err(Value::string(&format!(
                "ReferenceError: {name} is not defined"
            ))),
        }
    }

    fn eval_arguments(&mut self, args: &[Expression], env: &EnvRef) -> Result<Vec<Value>, Value> {
        args.iter().map(|arg| self.eval_expr(arg, env)).collect()
    }

    fn property_key(&mut self, property: &MemberProperty, env: &EnvRef) -> Result<Value, Value> {
        match property {
            MemberProperty::Dot(name) => Ok(Value::string(name)),
            MemberProperty::Computed(key) => self.eval_expr(key, env),
        }
    }

    fn get_property(&self, object: &Value, key: &Value) -> Result<Value, Value> {
        let is_length = matches!(key, Value::String(s) if &**s == "length");
        match object {
            Value::Undefined | Value::Null => {
                Err(type_error(format!("cannot read property {key} of {object}")))
            }
            Value::Array(items) => {
                let items = items.borrow();
                if is_length {
                    return Ok(Value::Number(items.len() as f64));
                }
                Ok(array_index(key)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Undefined))
            }
            Value::String(s) => {
                if is_length {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                Ok(array_index(key)
                    .and_then(|i| s.chars().nth(i))
                    .map_or(Value::Undefined, |c| Value::string(&c.to_string())))
            }
            Value::CompletionSource(state) if matches!(key, Value::String(s) if &**s == "task") => {
                Ok(Value::Task(state.clone()))
            }
            _ => Ok(Value::Undefined),
        }
    }

    fn assign_to(&mut self, target: &Expression, value: Value, env: &EnvRef) -> Result<(), Value> {
        match target {
            Expression::Identifier(name) => {
                env.borrow_mut().set(name, value);
                Ok(())
            }
            Expression::Member(object, property) => {
                let object = self.eval_expr(object, env)?;
                let key = self.property_key(property, env)?;
                match (&object, array_index(&key)) {
                    (Value::Array(items), Some(i)) => {
                        let mut items = items.borrow_mut();
                        if i >= items.len() {
                            items.resize(i + 1, Value::Undefined);
                        }
                        items[i] = value;
                        Ok(())
                    }
                    _ => Err(type_error(format!("cannot set property {key} of {object}"))),
                }
            }
            _ => Err(Value::string("SyntaxError: invalid assignment target")),
        }
    }

    fn call_method(&mut self, this: Value, key: &Value, args: Vec<Value>) -> Result<Value, Value> {
        let name = match key {
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        };
        match (&this, name.as_str()) {
            (Value::Array(items), "push") => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            (Value::Function(_) | Value::Builtin(_), "call") => {
                let mut args = args.into_iter();
                let receiver = args.next().unwrap_or(Value::Undefined);
                self.call_value(&this, receiver, args.collect())
            }
            (Value::CompletionSource(state), "setResult" | "setException") => {
                let mut state = state.borrow_mut();
                if matches!(*state, TaskState::Pending) {
                    let arg = args.into_iter().next().unwrap_or(Value::Undefined);
                    *state = if name == "setResult" {
                        TaskState::Resolved(arg)
                    } else {
                        TaskState::Rejected(arg)
                    };
                }
                Ok(Value::Undefined)
            }
            // Any value can be awaited; the continuation runs as a later job.
            (_, "onCompleted") => {
                let continuation = args.into_iter().next().unwrap_or(Value::Undefined);
                self.jobs.push_back(continuation);
                Ok(Value::Undefined)
            }
            _ => {
                let function = self.get_property(&this, key)?;
                self.call_value(&function, this.clone(), args)
            }
        }
    }

    pub(crate) fn call_value(
        &mut self,
        function: &Value,
        _this: Value,
        args: Vec<Value>,
    ) -> Result<Value, Value> {
        match function {
            Value::Function(closure) => self.call_function(closure, args),
            Value::Builtin(Builtin::Log) => {
                let line = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                trace!(target: "interpreter", %line, "log");
                self.log.push(line);
                Ok(Value::Undefined)
            }
            Value::Builtin(Builtin::TaskCompletionSource) => {
                Err(type_error("TaskCompletionSource requires 'new'"))
            }
            other => Err(type_error(format!("{other} is not a function"))),
        }
    }

    fn call_function(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Result<Value, Value> {
        let env = Environment::new(Some(closure.env.clone()), true);
        {
            let mut scope = env.borrow_mut();
            if let Some(name) = &closure.function.name {
                scope.declare(name, Value::Function(closure.clone()));
            }
            let mut args = args.into_iter();
            for param in &closure.function.params {
                scope.declare(param, args.next().unwrap_or(Value::Undefined));
            }
        }
        self.hoist_declarations(&closure.function.body, &env);
        match self.exec_statements(&closure.function.body, &env) {
            Completion::Normal(_) => Ok(Value::Undefined),
            Completion::Return(v) => Ok(v),
            Completion::Throw(e) => Err(e),
            other => Err(Value::string(&format!(
                "SyntaxError: {other:?} escaped a function body"
            ))),
        }
    }
}
