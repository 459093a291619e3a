use std::io::{self, Write};

use super::{Constant, Function, Instruction};

/// Re-emits the nested `function { ... }` form with tab indentation.
struct PrettyPrinter {
    indent: usize,
}

impl PrettyPrinter {
    fn new() -> Self {
        Self { indent: 0 }
    }

    fn print_function(&mut self, function: &Function, out: &mut dyn Write) -> io::Result<()> {
        self.write_indent(out)?;
        writeln!(out, "function")?;
        self.write_indent(out)?;
        writeln!(out, "{{")?;

        self.indent += 1;

        self.write_indent(out)?;
        write!(out, "functions =")?;
        if function.functions.is_empty() {
            writeln!(out, " [],")?;
        } else {
            writeln!(out)?;
            self.write_indent(out)?;
            writeln!(out, "[")?;
            self.indent += 1;
            for (index, child) in function.functions.iter().enumerate() {
                self.print_function(child, out)?;
                if index != function.functions.len() - 1 {
                    writeln!(out, ",")?;
                }
            }
            self.indent -= 1;
            writeln!(out)?;
            self.write_indent(out)?;
            writeln!(out, "],")?;
        }

        self.write_indent(out)?;
        write!(out, "constants = [")?;
        for (index, constant) in function.constants.iter().enumerate() {
            if index != 0 {
                write!(out, ", ")?;
            }
            self.print_constant(constant, out)?;
        }
        writeln!(out, "],")?;

        self.write_indent(out)?;
        writeln!(out, "parameter_count = {},", function.parameter_count)?;

        self.print_names("local_vars", &function.local_vars, out)?;
        self.print_names("local_ref_vars", &function.local_ref_vars, out)?;
        self.print_names("free_vars", &function.free_vars, out)?;
        self.print_names("names", &function.names, out)?;

        self.write_indent(out)?;
        writeln!(out, "instructions = ")?;
        self.write_indent(out)?;
        writeln!(out, "[")?;
        self.indent += 1;
        for instruction in &function.instructions {
            self.write_indent(out)?;
            self.print_instruction(instruction, out)?;
            writeln!(out)?;
        }
        self.indent -= 1;
        self.write_indent(out)?;
        writeln!(out, "]")?;

        self.indent -= 1;
        self.write_indent(out)?;
        write!(out, "}}")
    }

    fn print_names(&mut self, name: &str, names: &[String], out: &mut dyn Write) -> io::Result<()> {
        self.write_indent(out)?;
        write!(out, "{name} = [")?;
        for (index, entry) in names.iter().enumerate() {
            if index != 0 {
                write!(out, ", ")?;
            }
            write!(out, "{entry}")?;
        }
        writeln!(out, "],")
    }

    fn print_constant(&self, constant: &Constant, out: &mut dyn Write) -> io::Result<()> {
        match constant {
            Constant::None => write!(out, "None"),
            Constant::Boolean(true) => write!(out, "true"),
            Constant::Boolean(false) => write!(out, "false"),
            Constant::Integer(value) => write!(out, "{value}"),
            Constant::String(value) => write!(out, "\"{}\"", escape(value)),
        }
    }

    fn print_instruction(&self, instruction: &Instruction, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{}", instruction.operation.mnemonic())?;
        if let Some(operand) = instruction.operand {
            write!(out, "\t{operand}")?;
        }
        Ok(())
    }

    fn write_indent(&self, out: &mut dyn Write) -> io::Result<()> {
        for _ in 0..self.indent {
            write!(out, "\t")?;
        }
        Ok(())
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn prettyprint(function: &Function, out: &mut dyn Write) -> io::Result<()> {
    PrettyPrinter::new().print_function(function, out)
}

#[cfg(test)]
mod tests {
    use super::super::{Operation, parse};
    use super::*;

    fn printed(function: &Function) -> String {
        let mut out = Vec::new();
        prettyprint(function, &mut out).expect("print failed");
        String::from_utf8(out).expect("printed form is utf-8")
    }

    #[test]
    fn prints_flat_function() {
        let function = Function {
            constants: vec![
                Constant::None,
                Constant::Integer(-3),
                Constant::String("a\"b\n".to_string()),
            ],
            parameter_count: 1,
            local_vars: vec!["x".to_string(), "y".to_string()],
            names: vec!["print".to_string()],
            instructions: vec![
                Instruction::new(Operation::LoadConst, Some(1)),
                Instruction::new(Operation::Return, None),
            ],
            ..Function::default()
        };

        let expected = concat!(
            "function\n",
            "{\n",
            "\tfunctions = [],\n",
            "\tconstants = [None, -3, \"a\\\"b\\n\"],\n",
            "\tparameter_count = 1,\n",
            "\tlocal_vars = [x, y],\n",
            "\tlocal_ref_vars = [],\n",
            "\tfree_vars = [],\n",
            "\tnames = [print],\n",
            "\tinstructions = \n",
            "\t[\n",
            "\t\tload_const\t1\n",
            "\t\treturn\n",
            "\t]\n",
            "}",
        );
        assert_eq!(printed(&function), expected);
    }

    #[test]
    fn indents_nested_functions() {
        let child = Function {
            parameter_count: 2,
            instructions: vec![Instruction::new(Operation::Add, None)],
            ..Function::default()
        };
        let parent = Function {
            functions: vec![child],
            instructions: vec![Instruction::new(Operation::AllocClosure, Some(0))],
            ..Function::default()
        };

        let text = printed(&parent);
        assert!(text.contains("\tfunctions =\n\t[\n"));
        assert!(text.contains("\t\tfunction\n\t\t{\n"));
        assert!(text.contains("\t\t\tparameter_count = 2,\n"));
        assert!(text.ends_with("\talloc_closure\t0\n\t]\n}"));
    }

    #[test]
    fn printed_form_parses_back_to_the_same_function() {
        let function = Function {
            functions: vec![Function {
                parameter_count: 1,
                instructions: vec![
                    Instruction::new(Operation::LoadLocal, Some(0)),
                    Instruction::new(Operation::Neg, None),
                    Instruction::new(Operation::Return, None),
                ],
                ..Function::default()
            }],
            constants: vec![Constant::Boolean(false), Constant::String("s".to_string())],
            parameter_count: 0,
            local_vars: vec!["a".to_string()],
            local_ref_vars: vec!["b".to_string()],
            free_vars: vec!["c".to_string()],
            names: vec!["d".to_string()],
            instructions: vec![
                Instruction::new(Operation::LoadFunc, Some(0)),
                Instruction::new(Operation::AllocClosure, Some(0)),
                Instruction::new(Operation::Goto, Some(-2)),
            ],
            ..Function::default()
        };

        let reparsed = parse(&printed(&function)).expect("reparse failed");
        assert_eq!(reparsed, function);
    }
}
