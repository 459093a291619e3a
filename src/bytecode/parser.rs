use super::lexer::{self, Token, TokenKind};
use super::{BytecodeError, BytecodeResult, Constant, Function, Instruction, Operation};

/// Recursive-descent parser over the bytecode token stream. The grammar is
/// a fixed sequence of named, comma-separated sections per function.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> BytecodeResult<Function> {
        let function = self.parse_function()?;
        if !self.is_at_end() {
            return Err(self.error("end of input"));
        }
        Ok(function)
    }

    fn parse_function(&mut self) -> BytecodeResult<Function> {
        self.expect_keyword("function")?;
        self.expect(TokenKind::LBrace, "'{' after 'function'")?;

        self.expect_keyword("functions")?;
        self.expect(TokenKind::Assign, "'=' after 'functions'")?;
        self.expect(TokenKind::LBracket, "'[' after 'functions ='")?;
        let functions = self.parse_function_list()?;
        self.expect(TokenKind::RBracket, "']' after functions list")?;
        self.expect(TokenKind::Comma, "',' after functions list")?;

        self.expect_keyword("constants")?;
        self.expect(TokenKind::Assign, "'=' after 'constants'")?;
        self.expect(TokenKind::LBracket, "'[' after 'constants ='")?;
        let constants = self.parse_constant_list()?;
        self.expect(TokenKind::RBracket, "']' after constants list")?;
        self.expect(TokenKind::Comma, "',' after constants list")?;

        self.expect_keyword("parameter_count")?;
        self.expect(TokenKind::Assign, "'=' after 'parameter_count'")?;
        let parameter_count = self.expect_int("parameter count")?;
        if parameter_count < 0 {
            return Err(self.error("non-negative parameter count"));
        }
        self.expect(TokenKind::Comma, "',' after parameter count")?;

        let local_vars = self.parse_named_ident_list("local_vars")?;
        let local_ref_vars = self.parse_named_ident_list("local_ref_vars")?;
        let free_vars = self.parse_named_ident_list("free_vars")?;
        let names = self.parse_named_ident_list("names")?;

        self.expect_keyword("instructions")?;
        self.expect(TokenKind::Assign, "'=' after 'instructions'")?;
        self.expect(TokenKind::LBracket, "'[' after 'instructions ='")?;
        let instructions = self.parse_instruction_list()?;
        self.expect(TokenKind::RBracket, "']' after instructions list")?;

        self.expect(TokenKind::RBrace, "'}' to end function")?;

        Ok(Function {
            functions,
            constants,
            parameter_count: parameter_count as u32,
            local_vars,
            local_ref_vars,
            free_vars,
            names,
            instructions,
        })
    }

    fn parse_function_list(&mut self) -> BytecodeResult<Vec<Function>> {
        let mut list = Vec::new();
        if self.check_keyword("function") {
            list.push(self.parse_function()?);
        }
        while self.advance_if(&TokenKind::Comma) {
            if self.check_keyword("function") {
                list.push(self.parse_function()?);
            }
        }
        Ok(list)
    }

    fn parse_named_ident_list(&mut self, keyword: &str) -> BytecodeResult<Vec<String>> {
        self.expect_keyword(keyword)?;
        self.expect(TokenKind::Assign, "'=' after section name")?;
        self.expect(TokenKind::LBracket, "'[' after '='")?;
        let mut list = Vec::new();
        if !matches!(self.current().kind, TokenKind::RBracket) {
            list.push(self.expect_identifier("identifier")?);
            while self.advance_if(&TokenKind::Comma) {
                if matches!(self.current().kind, TokenKind::Ident(_)) {
                    list.push(self.expect_identifier("identifier after comma")?);
                }
            }
        }
        self.expect(TokenKind::RBracket, "']' after list")?;
        self.expect(TokenKind::Comma, "',' after list")?;
        Ok(list)
    }

    fn parse_constant(&mut self) -> BytecodeResult<Constant> {
        let constant = match &self.current().kind {
            TokenKind::Ident(name) if name == "None" => Constant::None,
            TokenKind::Ident(name) if name == "true" => Constant::Boolean(true),
            TokenKind::Ident(name) if name == "false" => Constant::Boolean(false),
            TokenKind::Int(value) => Constant::Integer(*value),
            TokenKind::Str(value) => Constant::String(value.clone()),
            _ => return Err(self.error("constant")),
        };
        self.advance();
        Ok(constant)
    }

    fn parse_constant_list(&mut self) -> BytecodeResult<Vec<Constant>> {
        let mut list = Vec::new();
        if matches!(self.current().kind, TokenKind::RBracket) {
            return Ok(list);
        }
        list.push(self.parse_constant()?);
        while self.advance_if(&TokenKind::Comma) {
            if !matches!(self.current().kind, TokenKind::RBracket) {
                list.push(self.parse_constant()?);
            }
        }
        Ok(list)
    }

    fn parse_instruction_list(&mut self) -> BytecodeResult<Vec<Instruction>> {
        let mut list = Vec::new();
        while !matches!(self.current().kind, TokenKind::RBracket) && !self.is_at_end() {
            list.push(self.parse_instruction()?);
        }
        Ok(list)
    }

    fn parse_instruction(&mut self) -> BytecodeResult<Instruction> {
        let operation = match &self.current().kind {
            TokenKind::Ident(name) => Operation::from_mnemonic(name),
            _ => None,
        };
        let Some(operation) = operation else {
            return Err(self.error("instruction"));
        };
        self.advance();
        let operand = if operation.has_operand() {
            let expected = format!("integer operand for {}", operation.mnemonic());
            Some(self.expect_int(&expected)?)
        } else {
            None
        };
        Ok(Instruction::new(operation, operand))
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        token
    }

    fn advance_if(&mut self, kind: &TokenKind) -> bool {
        if &self.current().kind == kind {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> BytecodeResult<Token> {
        if self.current().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> BytecodeResult<()> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("'{keyword}'")))
        }
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn expect_identifier(&mut self, expected: &str) -> BytecodeResult<String> {
        if let TokenKind::Ident(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_int(&mut self, expected: &str) -> BytecodeResult<i32> {
        if let TokenKind::Int(value) = self.current().kind {
            self.advance();
            Ok(value)
        } else {
            Err(self.error(expected))
        }
    }

    fn error(&self, expected: &str) -> BytecodeError {
        let token = self.current();
        BytecodeError::UnexpectedToken {
            expected: expected.to_string(),
            found: token.describe(),
            line: token.line,
            column: token.column,
        }
    }
}

pub fn parse(input: &str) -> BytecodeResult<Function> {
    let tokens = lexer::lex(input)?;
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const MINIMAL: &str = indoc! {r#"
        function {
            functions = [],
            constants = [None, true, 7, "hi"],
            parameter_count = 0,
            local_vars = [x],
            local_ref_vars = [],
            free_vars = [],
            names = [print],
            instructions = [
                load_const 2
                store_local 0
                load_global 0
                load_local 0
                call 1
                return
            ]
        }
    "#};

    #[test]
    fn parses_minimal_function() {
        let function = parse(MINIMAL).expect("parse failed");
        assert_eq!(
            function.constants,
            vec![
                Constant::None,
                Constant::Boolean(true),
                Constant::Integer(7),
                Constant::String("hi".to_string()),
            ]
        );
        assert_eq!(function.parameter_count, 0);
        assert_eq!(function.local_vars, vec!["x".to_string()]);
        assert_eq!(function.names, vec!["print".to_string()]);
        assert_eq!(
            function.instructions,
            vec![
                Instruction::new(Operation::LoadConst, Some(2)),
                Instruction::new(Operation::StoreLocal, Some(0)),
                Instruction::new(Operation::LoadGlobal, Some(0)),
                Instruction::new(Operation::LoadLocal, Some(0)),
                Instruction::new(Operation::Call, Some(1)),
                Instruction::new(Operation::Return, None),
            ]
        );
    }

    #[test]
    fn parses_nested_functions() {
        let source = indoc! {r#"
            function {
                functions = [
                    function {
                        functions = [],
                        constants = [],
                        parameter_count = 2,
                        local_vars = [],
                        local_ref_vars = [],
                        free_vars = [],
                        names = [],
                        instructions = [
                            load_local 0
                            load_local 1
                            add
                            return
                        ]
                    }
                ],
                constants = [],
                parameter_count = 0,
                local_vars = [],
                local_ref_vars = [],
                free_vars = [],
                names = [],
                instructions = [
                    load_func 0
                    alloc_closure 0
                    return
                ]
            }
        "#};
        let function = parse(source).expect("parse failed");
        assert_eq!(function.functions.len(), 1);
        assert_eq!(function.functions[0].parameter_count, 2);
        assert_eq!(
            function.functions[0].instructions[2],
            Instruction::new(Operation::Add, None)
        );
    }

    #[test]
    fn rejects_missing_operand() {
        let source = MINIMAL.replace("load_const 2", "load_const");
        let error = parse(&source).expect_err("expected failure");
        assert!(matches!(error, BytecodeError::UnexpectedToken { .. }));
        assert!(error.to_string().contains("integer operand for load_const"));
    }

    #[test]
    fn rejects_unknown_instruction() {
        let source = MINIMAL.replace("return", "halt");
        let error = parse(&source).expect_err("expected failure");
        assert!(error.to_string().contains("Expected instruction"));
    }

    #[test]
    fn rejects_missing_section() {
        let source = MINIMAL.replace("local_ref_vars", "ref_vars");
        let error = parse(&source).expect_err("expected failure");
        assert!(error.to_string().contains("'local_ref_vars'"));
    }

    #[test]
    fn rejects_trailing_tokens() {
        let source = format!("{MINIMAL}\npop");
        let error = parse(&source).expect_err("expected failure");
        assert!(error.to_string().contains("Expected end of input"));
    }
}
