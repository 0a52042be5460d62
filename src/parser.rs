//! The pest-generated SQL parser and the operator-precedence table.
//!
//! `SQLParser` turns statement text into a parse tree per `sql.pest`;
//! `pt_to_ast` walks the tree into the AST. Expression pairs come out of
//! the grammar as a flat operand/operator stream and are shaped here by a
//! `PrattParser` with the SQL precedence ladder: OR < AND < NOT <
//! comparisons < additive < multiplicative < unary minus.

use lazy_static::lazy_static;
use pest::pratt_parser::{Assoc, Op, PrattParser};

#[derive(Parser)]
#[grammar = "sql.pest"]
pub struct SQLParser;

lazy_static! {
    pub static ref PRATT_PARSER: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
        .op(Op::infix(Rule::eq_op, Assoc::Left)
            | Op::infix(Rule::neq_op, Assoc::Left)
            | Op::infix(Rule::lt_op, Assoc::Left)
            | Op::infix(Rule::lte_op, Assoc::Left)
            | Op::infix(Rule::gt_op, Assoc::Left)
            | Op::infix(Rule::gte_op, Assoc::Left))
        .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left) | Op::infix(Rule::div_op, Assoc::Left))
        .op(Op::prefix(Rule::neg_op));
}
