//! Recursive-descent parser with precedence climbing for expressions.
//!
//! Statements are chosen by lookahead on the token that follows an indent.
//! Blocks are indentation-delimited; indent strings are compared literally,
//! so a block is deeper only when its indent strictly extends the parent's.

use super::ast::*;
use crate::lexer::{Lexer, Token, TokenKind};
use std::path::{Path, PathBuf};
use steward_core::CompileError;

/// Binding power for a binary operator token, if it is one.
fn binop_precedence(token: &Token) -> Option<u8> {
    match token.kind {
        TokenKind::Or => Some(20),
        TokenKind::And => Some(30),
        TokenKind::ComparisonOp => Some(50),
        TokenKind::ArithmeticOp => match token.text.as_str() {
            "+" | "-" => Some(60),
            "*" | "/" | "//" | "%" => Some(70),
            "**" => Some(90),
            _ => None,
        },
        _ => None,
    }
}

const UNARY_NEG_PRECEDENCE: u8 = 80;
const UNARY_NOT_PRECEDENCE: u8 = 40;

pub struct Parser {
    lexer: Lexer,
    current: Token,
    next: Token,
    group_depth: usize,
}

impl Parser {
    pub fn new(path: &Path) -> Result<Self, CompileError> {
        Self::with_lexer(Lexer::from_file(path)?)
    }

    pub fn from_source(source: &str, file: PathBuf) -> Result<Self, CompileError> {
        Self::with_lexer(Lexer::new(source, file))
    }

    fn with_lexer(mut lexer: Lexer) -> Result<Self, CompileError> {
        let current = lexer.next_token()?;
        let next = lexer.next_token()?;
        let mut parser = Self {
            lexer,
            current,
            next,
            group_depth: 0,
        };
        parser.normalize()?;
        Ok(parser)
    }

    /// Parses a standalone expression, as used by f-string interpolation.
    pub fn parse_expression_source(source: &str) -> Result<Expr, CompileError> {
        let mut parser = Self::from_source(source, PathBuf::from("<inline>"))?;
        if parser.current.kind == TokenKind::Indent {
            parser.bump()?;
        }
        let expr = parser.parse_expression(0)?;
        match parser.current.kind {
            TokenKind::Eof | TokenKind::Indent => Ok(expr),
            _ => Err(parser.unexpected("Unexpected token after expression.")),
        }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn normalize(&mut self) -> Result<(), CompileError> {
        loop {
            // Adjacent string literals merge into one token with the span
            // of the first.
            if self.current.kind == TokenKind::String && self.next.kind == TokenKind::String {
                let merged = std::mem::replace(&mut self.next, self.lexer.next_token()?);
                self.current.text.push_str(&merged.text);
                continue;
            }
            // Runs of indents (blank or comment-only lines) collapse to the
            // last one.
            if self.current.kind == TokenKind::Indent && self.next.kind == TokenKind::Indent {
                self.current = std::mem::replace(&mut self.next, self.lexer.next_token()?);
                continue;
            }
            // Inside parens/brackets/braces, newlines are insignificant.
            if self.group_depth > 0 && self.current.kind == TokenKind::Indent {
                self.current = std::mem::replace(&mut self.next, self.lexer.next_token()?);
                continue;
            }
            break;
        }
        Ok(())
    }

    fn bump(&mut self) -> Result<Token, CompileError> {
        let upcoming = std::mem::replace(&mut self.next, self.lexer.next_token()?);
        let previous = std::mem::replace(&mut self.current, upcoming);
        self.normalize()?;
        Ok(previous)
    }

    fn open_group(&mut self) -> Result<(), CompileError> {
        self.group_depth += 1;
        self.bump()?;
        Ok(())
    }

    fn close_group(&mut self, kind: TokenKind, what: &str) -> Result<(), CompileError> {
        if self.current.kind != kind {
            return Err(self.unexpected(what));
        }
        self.group_depth -= 1;
        self.bump()?;
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.current.kind == kind {
            self.bump()
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<Token, CompileError> {
        self.expect(TokenKind::Identifier, what)
    }

    fn unexpected(&self, reason: &str) -> CompileError {
        CompileError::Parser {
            reason: format!("{} (found '{}')", reason, self.current.text),
            span: self.current.span.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parses the whole file: statements at the zero-width indent level.
    pub fn parse_module(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut stmts = Vec::new();
        loop {
            match self.current.kind {
                TokenKind::Eof => break,
                TokenKind::Indent => {
                    if !self.current.text.is_empty() {
                        return Err(self.unexpected("Unexpected indentation."));
                    }
                    self.bump()?;
                    if self.current.kind == TokenKind::Eof {
                        break;
                    }
                    stmts.push(self.parse_statement("")?);
                }
                _ => return Err(self.unexpected("Unexpected token.")),
            }
        }
        Ok(stmts)
    }

    /// One statement at the given indent level. Leaves the cursor on the
    /// indent (or EOF) that follows it.
    fn parse_statement(&mut self, indent: &str) -> Result<Stmt, CompileError> {
        match self.current.kind {
            TokenKind::Resource => self.parse_resource(indent),
            TokenKind::Typedef => self.parse_typedef(),
            TokenKind::Enum => self.parse_enum(indent),
            TokenKind::If => self.parse_if(indent),
            TokenKind::For => self.parse_for(indent),
            TokenKind::Import => self.parse_import(),
            TokenKind::From => self.parse_from_import(),
            TokenKind::At => self.parse_decorated(indent),
            TokenKind::Def => self.parse_plugin_def(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, CompileError> {
        let token = self.current.clone();
        let expr = self.parse_expression(0)?;

        let annotation = if self.current.kind == TokenKind::Colon {
            self.bump()?;
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        if self.current.kind == TokenKind::Assign {
            self.bump()?;
            let value = self.parse_expression(0)?;
            let target = Self::expr_to_target(expr)?;
            return Ok(Stmt {
                token,
                kind: StmtKind::Assign {
                    target,
                    annotation,
                    value,
                },
            });
        }

        if let Some(annotation) = annotation {
            return Err(CompileError::Parser {
                reason: "A type annotation must be followed by an assignment.".to_string(),
                span: annotation.token.span,
            });
        }
        Ok(Stmt {
            token,
            kind: StmtKind::Expr(expr),
        })
    }

    fn expr_to_target(expr: Expr) -> Result<AssignTarget, CompileError> {
        match expr.kind {
            ExprKind::Identifier(name) => Ok(AssignTarget::Name(name)),
            ExprKind::Attribute { target, attr } => Ok(AssignTarget::Attribute {
                target: *target,
                attr,
            }),
            _ => Err(CompileError::Parser {
                reason: "Cannot assign to this expression.".to_string(),
                span: expr.token.span,
            }),
        }
    }

    /// Parses a block after a `:`; `item` parses one entry at the block's
    /// indent level.
    fn parse_block<T>(
        &mut self,
        parent_indent: &str,
        mut item: impl FnMut(&mut Self, &str) -> Result<T, CompileError>,
    ) -> Result<Vec<T>, CompileError> {
        if self.current.kind != TokenKind::Indent {
            return Err(self.unexpected("Expected an indented block."));
        }
        let body_indent = self.current.text.clone();
        if !body_indent.starts_with(parent_indent) || body_indent.len() <= parent_indent.len() {
            return Err(self.unexpected("Expected a deeper indentation level."));
        }

        let mut items = Vec::new();
        loop {
            match self.current.kind {
                TokenKind::Eof => break,
                TokenKind::Indent => {
                    if self.current.text == body_indent {
                        self.bump()?;
                        if self.current.kind == TokenKind::Eof {
                            break;
                        }
                        items.push(item(self, &body_indent)?);
                    } else if self.current.text.starts_with(&body_indent) {
                        return Err(self.unexpected("Unexpected indentation."));
                    } else {
                        // Shallower indent ends the block; the caller owns it.
                        break;
                    }
                }
                _ => return Err(self.unexpected("Unexpected token.")),
            }
        }
        Ok(items)
    }

    fn parse_if(&mut self, indent: &str) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::If, "Expected 'if'.")?;
        let mut arms = Vec::new();

        let guard = self.parse_expression(0)?;
        self.expect(TokenKind::Colon, "Expected ':' after condition.")?;
        let body = self.parse_block(indent, |p, i| p.parse_statement(i))?;
        arms.push(IfArm {
            guard: Some(guard),
            body,
        });

        loop {
            if self.current.kind != TokenKind::Indent || self.current.text != indent {
                break;
            }
            match self.next.kind {
                TokenKind::Elif => {
                    self.bump()?;
                    self.bump()?;
                    let guard = self.parse_expression(0)?;
                    self.expect(TokenKind::Colon, "Expected ':' after condition.")?;
                    let body = self.parse_block(indent, |p, i| p.parse_statement(i))?;
                    arms.push(IfArm {
                        guard: Some(guard),
                        body,
                    });
                }
                TokenKind::Else => {
                    self.bump()?;
                    self.bump()?;
                    self.expect(TokenKind::Colon, "Expected ':' after 'else'.")?;
                    let body = self.parse_block(indent, |p, i| p.parse_statement(i))?;
                    arms.push(IfArm { guard: None, body });
                    break;
                }
                _ => break,
            }
        }

        Ok(Stmt {
            token,
            kind: StmtKind::If { arms },
        })
    }

    fn parse_for(&mut self, indent: &str) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::For, "Expected 'for'.")?;
        let var_token = self.expect_identifier("Expected a loop variable name.")?;
        self.expect(TokenKind::In, "Expected 'in'.")?;
        let iterable = self.parse_expression(0)?;
        self.expect(TokenKind::Colon, "Expected ':' after iterable.")?;
        let body = self.parse_block(indent, |p, i| p.parse_statement(i))?;
        Ok(Stmt {
            token,
            kind: StmtKind::For {
                var: var_token.text.clone(),
                var_token,
                iterable,
                body,
            },
        })
    }

    fn parse_typedef(&mut self) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::Typedef, "Expected 'typedef'.")?;
        let name = self.expect_identifier("Expected a typedef name.")?;
        let base = self.parse_type_expr()?;
        let condition = if self.current.kind == TokenKind::Colon {
            self.bump()?;
            Some(self.parse_expression(0)?)
        } else {
            None
        };
        Ok(Stmt {
            token,
            kind: StmtKind::Typedef {
                name: name.text,
                base,
                condition,
            },
        })
    }

    fn parse_enum(&mut self, indent: &str) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::Enum, "Expected 'enum'.")?;
        let name = self.expect_identifier("Expected an enum name.")?;
        self.expect(TokenKind::Colon, "Expected ':' after enum name.")?;
        let members = self.parse_block(indent, |p, _| {
            let member = p.expect_identifier("Expected an enum member name.")?;
            Ok(member.text)
        })?;
        Ok(Stmt {
            token,
            kind: StmtKind::Enum {
                name: name.text,
                members,
            },
        })
    }

    fn parse_dotted_path(&mut self) -> Result<Vec<String>, CompileError> {
        let first = self.expect_identifier("Expected a module name.")?;
        let mut path = vec![first.text];
        while self.current.kind == TokenKind::Dot {
            self.bump()?;
            let segment = self.expect_identifier("Expected a name after '.'.")?;
            path.push(segment.text);
        }
        Ok(path)
    }

    fn parse_import(&mut self) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::Import, "Expected 'import'.")?;
        let path = self.parse_dotted_path()?;
        Ok(Stmt {
            token,
            kind: StmtKind::Import { path },
        })
    }

    fn parse_from_import(&mut self) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::From, "Expected 'from'.")?;
        let path = self.parse_dotted_path()?;
        self.expect(TokenKind::Import, "Expected 'import'.")?;
        let mut names = Vec::new();
        loop {
            let name = self.expect_identifier("Expected a name to import.")?;
            names.push((name.text.clone(), name));
            if self.current.kind == TokenKind::Comma {
                self.bump()?;
            } else {
                break;
            }
        }
        Ok(Stmt {
            token,
            kind: StmtKind::FromImport { path, names },
        })
    }

    fn parse_decorated(&mut self, indent: &str) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::At, "Expected '@'.")?;
        let path = self.parse_dotted_path()?;
        let mut args = Vec::new();
        if self.current.kind == TokenKind::LeftParen {
            self.open_group()?;
            while self.current.kind != TokenKind::RightParen {
                args.push(self.parse_expression(0)?);
                if self.current.kind == TokenKind::Comma {
                    self.bump()?;
                }
            }
            self.close_group(TokenKind::RightParen, "Expected ')'.")?;
        }

        if self.current.kind != TokenKind::Indent || self.current.text != indent {
            return Err(self.unexpected("Expected a definition after the decorator."));
        }
        self.bump()?;
        let target = self.parse_statement(indent)?;
        Ok(Stmt {
            token,
            kind: StmtKind::Decorated {
                path,
                args,
                target: Box::new(target),
            },
        })
    }

    fn parse_plugin_def(&mut self) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::Def, "Expected 'def'.")?;
        let name = self.expect_identifier("Expected a plugin name.")?;
        self.expect(TokenKind::LeftParen, "Expected '(' after plugin name.")?;
        self.group_depth += 1;
        self.normalize()?;

        let mut params = Vec::new();
        while self.current.kind != TokenKind::RightParen {
            let param = self.expect_identifier("Expected a parameter name.")?;
            self.expect(TokenKind::Colon, "Expected ':' after parameter name.")?;
            let ty = self.parse_type_expr()?;
            params.push(PluginParam {
                name: param.text.clone(),
                token: param,
                ty,
            });
            if self.current.kind == TokenKind::Comma {
                self.bump()?;
            }
        }
        self.close_group(TokenKind::RightParen, "Expected ')'.")?;

        let ret = if self.current.kind == TokenKind::Colon {
            self.bump()?;
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        Ok(Stmt {
            token,
            kind: StmtKind::PluginDef {
                name: name.text,
                params,
                ret,
            },
        })
    }

    fn parse_resource(&mut self, indent: &str) -> Result<Stmt, CompileError> {
        let token = self.expect(TokenKind::Resource, "Expected 'resource'.")?;
        let name = self.expect_identifier("Expected a resource name.")?;

        let base = if self.current.kind == TokenKind::LeftParen {
            self.open_group()?;
            let base = self.parse_type_expr()?;
            self.close_group(TokenKind::RightParen, "Expected ')' after base type.")?;
            Some(base)
        } else {
            None
        };

        self.expect(TokenKind::Colon, "Expected ':' after resource name.")?;

        enum ResourceItem {
            Property(PropertyDecl),
            Promise(PromiseDecl),
            Constructor(ConstructorDecl),
        }

        let items = self.parse_block(indent, |p, body_indent| match p.current.kind {
            TokenKind::Promise => {
                let token = p.bump()?;
                let name = p.expect_identifier("Expected a promise name.")?;
                p.expect(TokenKind::Colon, "Expected ':' after promise name.")?;
                let ty = p.parse_type_expr()?;
                Ok(ResourceItem::Promise(PromiseDecl {
                    name: name.text,
                    token,
                    ty,
                }))
            }
            TokenKind::Implement => {
                let token = p.bump()?;
                let name = p.expect_identifier("Expected a constructor name.")?;
                p.expect(TokenKind::LeftParen, "Expected '(' after constructor name.")?;
                p.group_depth += 1;
                p.normalize()?;
                let mut params = Vec::new();
                while p.current.kind != TokenKind::RightParen {
                    let param = p.expect_identifier("Expected a parameter name.")?;
                    let ty = if p.current.kind == TokenKind::Colon {
                        p.bump()?;
                        Some(p.parse_type_expr()?)
                    } else {
                        None
                    };
                    let default = if p.current.kind == TokenKind::Assign {
                        p.bump()?;
                        Some(p.parse_expression(0)?)
                    } else {
                        None
                    };
                    params.push(ConstructorParam {
                        name: param.text.clone(),
                        token: param,
                        ty,
                        default,
                    });
                    if p.current.kind == TokenKind::Comma {
                        p.bump()?;
                    }
                }
                p.close_group(TokenKind::RightParen, "Expected ')'.")?;
                p.expect(TokenKind::Colon, "Expected ':' after constructor parameters.")?;
                let body = p.parse_block(body_indent, |p, i| p.parse_statement(i))?;
                Ok(ResourceItem::Constructor(ConstructorDecl {
                    name: name.text,
                    token,
                    params,
                    body,
                }))
            }
            TokenKind::Identifier => {
                let name = p.expect_identifier("Expected a property name.")?;
                p.expect(TokenKind::Colon, "Expected ':' after property name.")?;
                let ty = p.parse_type_expr()?;
                let default = if p.current.kind == TokenKind::Assign {
                    p.bump()?;
                    Some(p.parse_expression(0)?)
                } else {
                    None
                };
                Ok(ResourceItem::Property(PropertyDecl {
                    name: name.text.clone(),
                    token: name,
                    ty,
                    default,
                }))
            }
            _ => Err(p.unexpected("Expected a property, promise or 'implement' block.")),
        })?;

        let mut def = ResourceDefStmt {
            name: name.text,
            base,
            properties: Vec::new(),
            promises: Vec::new(),
            constructors: Vec::new(),
        };
        for item in items {
            match item {
                ResourceItem::Property(p) => def.properties.push(p),
                ResourceItem::Promise(p) => def.promises.push(p),
                ResourceItem::Constructor(c) => def.constructors.push(c),
            }
        }

        Ok(Stmt {
            token,
            kind: StmtKind::Resource(def),
        })
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type_expr(&mut self) -> Result<TypeExpr, CompileError> {
        let first = self.expect_identifier("Expected a type name.")?;
        let mut path = vec![first.text.clone()];
        while self.current.kind == TokenKind::Dot {
            self.bump()?;
            let segment = self.expect_identifier("Expected a name after '.'.")?;
            path.push(segment.text);
        }

        let mut args = Vec::new();
        if self.current.kind == TokenKind::LeftBracket {
            self.open_group()?;
            while self.current.kind != TokenKind::RightBracket {
                args.push(self.parse_type_expr()?);
                if self.current.kind == TokenKind::Comma {
                    self.bump()?;
                }
            }
            self.close_group(TokenKind::RightBracket, "Expected ']'.")?;
        }

        Ok(TypeExpr {
            token: first,
            path,
            args,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self, min_precedence: u8) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some(precedence) = binop_precedence(&self.current) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }

            let op_token = self.bump()?;
            // `**` is right-associative; everything else binds left.
            let next_min = if op_token.text == "**" {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.parse_expression(next_min)?;
            lhs = Expr {
                token: op_token.clone(),
                kind: ExprKind::BinOp {
                    op: op_token.text,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.current.kind == TokenKind::ArithmeticOp && self.current.text == "-" {
            let token = self.bump()?;
            let rhs = self.parse_expression(UNARY_NEG_PRECEDENCE)?;
            return Ok(Expr {
                token,
                kind: ExprKind::UnaryNeg(Box::new(rhs)),
            });
        }
        if self.current.kind == TokenKind::Not {
            let token = self.bump()?;
            let rhs = self.parse_expression(UNARY_NOT_PRECEDENCE)?;
            return Ok(Expr {
                token,
                kind: ExprKind::UnaryNot(Box::new(rhs)),
            });
        }

        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.current.kind {
            TokenKind::Integer => {
                let token = self.bump()?;
                let value = token.text.parse::<i64>().map_err(|_| CompileError::Parser {
                    reason: format!("Integer literal '{}' is out of range.", token.text),
                    span: token.span.clone(),
                })?;
                Ok(Expr {
                    token,
                    kind: ExprKind::Int(value),
                })
            }
            TokenKind::Float => {
                let token = self.bump()?;
                let value = token.text.parse::<f64>().map_err(|_| CompileError::Parser {
                    reason: format!("Float literal '{}' is malformed.", token.text),
                    span: token.span.clone(),
                })?;
                Ok(Expr {
                    token,
                    kind: ExprKind::Float(value),
                })
            }
            TokenKind::String => {
                let token = self.bump()?;
                let value = token.text.clone();
                Ok(Expr {
                    token,
                    kind: ExprKind::Str(value),
                })
            }
            TokenKind::FString => {
                let token = self.bump()?;
                let value = token.text.clone();
                Ok(Expr {
                    token,
                    kind: ExprKind::FString(value),
                })
            }
            TokenKind::True | TokenKind::False => {
                let token = self.bump()?;
                let value = token.kind == TokenKind::True;
                Ok(Expr {
                    token,
                    kind: ExprKind::Bool(value),
                })
            }
            TokenKind::Identifier => {
                let token = self.bump()?;
                let name = token.text.clone();
                Ok(Expr {
                    token,
                    kind: ExprKind::Identifier(name),
                })
            }
            TokenKind::LeftParen => {
                self.open_group()?;
                let inner = self.parse_expression(0)?;
                self.close_group(TokenKind::RightParen, "Expected ')'.")?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                let token = self.current.clone();
                self.open_group()?;
                let mut elements = Vec::new();
                while self.current.kind != TokenKind::RightBracket {
                    elements.push(self.parse_expression(0)?);
                    if self.current.kind == TokenKind::Comma {
                        self.bump()?;
                    } else {
                        break;
                    }
                }
                self.close_group(TokenKind::RightBracket, "Expected ']'.")?;
                Ok(Expr {
                    token,
                    kind: ExprKind::List(elements),
                })
            }
            TokenKind::LeftBrace => {
                let token = self.current.clone();
                self.open_group()?;
                let mut entries = Vec::new();
                while self.current.kind != TokenKind::RightBrace {
                    let key = self.parse_expression(0)?;
                    self.expect(TokenKind::Colon, "Expected ':' after dict key.")?;
                    let value = self.parse_expression(0)?;
                    entries.push((key, value));
                    if self.current.kind == TokenKind::Comma {
                        self.bump()?;
                    } else {
                        break;
                    }
                }
                self.close_group(TokenKind::RightBrace, "Expected '}'.")?;
                Ok(Expr {
                    token,
                    kind: ExprKind::Dict(entries),
                })
            }
            _ => Err(self.unexpected("Unexpected token.")),
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, CompileError> {
        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    let token = self.bump()?;
                    let attr = self.expect_identifier("Expected a name after '.'.")?;
                    expr = Expr {
                        token,
                        kind: ExprKind::Attribute {
                            target: Box::new(expr),
                            attr: attr.text,
                        },
                    };
                }
                TokenKind::LeftBracket => {
                    let token = self.current.clone();
                    self.open_group()?;
                    let index = self.parse_expression(0)?;
                    self.close_group(TokenKind::RightBracket, "Expected ']'.")?;
                    expr = Expr {
                        token,
                        kind: ExprKind::Subscript {
                            target: Box::new(expr),
                            index: Box::new(index),
                        },
                    };
                }
                TokenKind::LeftParen => {
                    let token = self.current.clone();
                    self.open_group()?;
                    let mut args = Vec::new();
                    while self.current.kind != TokenKind::RightParen {
                        let name = if self.current.kind == TokenKind::Identifier
                            && self.next.kind == TokenKind::Assign
                        {
                            let name = self.bump()?;
                            self.bump()?;
                            Some(name.text)
                        } else {
                            None
                        };
                        let value = self.parse_expression(0)?;
                        args.push(CallArg { name, value });
                        if self.current.kind == TokenKind::Comma {
                            self.bump()?;
                        } else {
                            break;
                        }
                    }
                    self.close_group(TokenKind::RightParen, "Expected ')'.")?;
                    expr = Expr {
                        token,
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        let mut parser =
            Parser::from_source(source, PathBuf::from("<test>")).expect("lexer failed");
        parser.parse_module().expect("parse failed")
    }

    fn parse_expr(source: &str) -> Expr {
        Parser::parse_expression_source(source).expect("parse failed")
    }

    /// Renders an expression tree with full parenthesisation, for
    /// precedence assertions.
    fn render(expr: &Expr) -> String {
        match &expr.kind {
            ExprKind::Int(i) => i.to_string(),
            ExprKind::Float(f) => f.to_string(),
            ExprKind::Identifier(name) => name.clone(),
            ExprKind::UnaryNeg(inner) => format!("(-{})", render(inner)),
            ExprKind::UnaryNot(inner) => format!("(not {})", render(inner)),
            ExprKind::BinOp { op, lhs, rhs } => {
                format!("({} {} {})", render(lhs), op, render(rhs))
            }
            other => format!("{other:?}"),
        }
    }

    #[test]
    fn precedence_add_and_floor_div() {
        let expr = parse_expr("1 + 4 // 2 + 3");
        assert_eq!(render(&expr), "((1 + (4 // 2)) + 3)");
    }

    #[test]
    fn precedence_unary_and_pow() {
        let expr = parse_expr("1 + 2 // -3 ** 2 + -7 * 2");
        assert_eq!(render(&expr), "((1 + (2 // (-(3 ** 2)))) + ((-7) * 2))");
    }

    #[test]
    fn precedence_parens_override() {
        let expr = parse_expr("((1 + 2) // -3) ** 2 + -(7 * 2)");
        assert_eq!(render(&expr), "((((1 + 2) // (-3)) ** 2) + (-(7 * 2)))");
    }

    #[test]
    fn pow_is_right_associative() {
        let expr = parse_expr("2 ** 3 ** 2");
        assert_eq!(render(&expr), "(2 ** (3 ** 2))");
    }

    #[test]
    fn not_binds_looser_than_comparison() {
        let expr = parse_expr("not 1 == 2");
        assert_eq!(render(&expr), "(not (1 == 2))");
    }

    #[test]
    fn adjacent_strings_merge() {
        let expr = parse_expr(r#""auto" " concat" " string""#);
        assert_eq!(expr.kind, ExprKind::Str("auto concat string".to_string()));
    }

    #[test]
    fn spans_start_with_the_introducing_token() {
        let stmts = parse("a = 1 + 2");
        let stmt = &stmts[0];
        assert_eq!(stmt.token.span.line, 0);
        assert_eq!(stmt.token.span.col, 0);
        let StmtKind::Assign { value, .. } = &stmt.kind else {
            panic!("expected an assignment");
        };
        assert_eq!(value.token.text, "+");
    }

    #[test]
    fn assignment_with_annotation() {
        let stmts = parse("port : int = 8080");
        let StmtKind::Assign {
            target, annotation, ..
        } = &stmts[0].kind
        else {
            panic!("expected an assignment");
        };
        assert_eq!(target, &AssignTarget::Name("port".to_string()));
        assert_eq!(annotation.as_ref().unwrap().path, vec!["int"]);
    }

    #[test]
    fn resource_definition_shape() {
        let source = "\
resource Host:
    name: str
    port: int = 22
    promise token: str

    implement default(name: str):
        self.name = name
        self.port = 2222
";
        let stmts = parse(source);
        let StmtKind::Resource(def) = &stmts[0].kind else {
            panic!("expected a resource definition");
        };
        assert_eq!(def.name, "Host");
        assert_eq!(def.properties.len(), 2);
        assert_eq!(def.promises.len(), 1);
        assert_eq!(def.constructors.len(), 1);
        assert_eq!(def.constructors[0].body.len(), 2);
        assert!(def.properties[1].default.is_some());
    }

    #[test]
    fn resource_with_base() {
        let stmts = parse("resource Child(Base):\n    name: str\n");
        let StmtKind::Resource(def) = &stmts[0].kind else {
            panic!("expected a resource definition");
        };
        assert_eq!(def.base.as_ref().unwrap().path, vec!["Base"]);
    }

    #[test]
    fn if_elif_else_chain() {
        let source = "\
if a:
    x = 1
elif b:
    x = 2
else:
    x = 3
";
        let stmts = parse(source);
        let StmtKind::If { arms } = &stmts[0].kind else {
            panic!("expected an if statement");
        };
        assert_eq!(arms.len(), 3);
        assert!(arms[0].guard.is_some());
        assert!(arms[1].guard.is_some());
        assert!(arms[2].guard.is_none());
    }

    #[test]
    fn for_loop() {
        let stmts = parse("for item in [1, 2, 3]:\n    a = item\n");
        let StmtKind::For { var, body, .. } = &stmts[0].kind else {
            panic!("expected a for statement");
        };
        assert_eq!(var, "item");
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn imports() {
        let stmts = parse("import std.env\nfrom a.b import x, y\n");
        assert_eq!(
            stmts[0].kind,
            StmtKind::Import {
                path: vec!["std".to_string(), "env".to_string()]
            }
        );
        let StmtKind::FromImport { path, names } = &stmts[1].kind else {
            panic!("expected a from-import");
        };
        assert_eq!(path, &["a", "b"]);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn decorator_attaches_to_resource() {
        let source = "\
@index([\"name\", \"port\"])
resource Host:
    name: str
    port: int
";
        let stmts = parse(source);
        let StmtKind::Decorated { path, args, target } = &stmts[0].kind else {
            panic!("expected a decorated statement");
        };
        assert_eq!(path, &["index"]);
        assert_eq!(args.len(), 1);
        assert!(matches!(target.kind, StmtKind::Resource(_)));
    }

    #[test]
    fn typedef_with_condition() {
        let stmts = parse("typedef PositiveInt int : self > 0\n");
        let StmtKind::Typedef {
            name,
            base,
            condition,
        } = &stmts[0].kind
        else {
            panic!("expected a typedef");
        };
        assert_eq!(name, "PositiveInt");
        assert_eq!(base.path, vec!["int"]);
        assert!(condition.is_some());
    }

    #[test]
    fn enum_definition() {
        let stmts = parse("enum Color:\n    red\n    green\n");
        assert_eq!(
            stmts[0].kind,
            StmtKind::Enum {
                name: "Color".to_string(),
                members: vec!["red".to_string(), "green".to_string()]
            }
        );
    }

    #[test]
    fn multiline_lists_ignore_newlines() {
        let stmts = parse("a = [\n    1,\n    2,\n]\n");
        let StmtKind::Assign { value, .. } = &stmts[0].kind else {
            panic!("expected an assignment");
        };
        let ExprKind::List(elements) = &value.kind else {
            panic!("expected a list literal");
        };
        assert_eq!(elements.len(), 2);
    }

    #[test]
    fn blank_and_comment_lines_do_not_end_blocks() {
        let source = "\
if a:
    x = 1

    # a comment
    y = 2
z = 3
";
        let stmts = parse(source);
        assert_eq!(stmts.len(), 2);
        let StmtKind::If { arms } = &stmts[0].kind else {
            panic!("expected an if statement");
        };
        assert_eq!(arms[0].body.len(), 2);
    }

    #[test]
    fn first_error_aborts() {
        let mut parser =
            Parser::from_source("a = = 1", PathBuf::from("<test>")).expect("lexer failed");
        let err = parser.parse_module().unwrap_err();
        assert!(matches!(err, CompileError::Parser { .. }));
    }

    #[test]
    fn keyword_call_arguments() {
        let expr = parse_expr("Host(name=\"web\", port=22)");
        let ExprKind::Call { args, .. } = &expr.kind else {
            panic!("expected a call");
        };
        assert_eq!(args[0].name.as_deref(), Some("name"));
        assert_eq!(args[1].name.as_deref(), Some("port"));
    }

    #[test]
    fn plugin_declaration() {
        let stmts = parse("def match(pattern: str, subject: str) : bool\n");
        let StmtKind::PluginDef { name, params, ret } = &stmts[0].kind else {
            panic!("expected a plugin declaration");
        };
        assert_eq!(name, "match");
        assert_eq!(params.len(), 2);
        assert!(ret.is_some());
    }
}
