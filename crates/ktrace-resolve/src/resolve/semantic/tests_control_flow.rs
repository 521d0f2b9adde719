//! Control flow, probe family, subprogram and cast tests.

use ktrace_ast::ast::{
    Block, Expr, ExprKind, JumpKind, Stmt, StmtKind, Subprog, TypeSpec, UnOp,
};
use ktrace_ast::foundation::{Features, SizedType};

use super::tests_util::{z, TB};

fn jump(kind: JumpKind, span: ktrace_ast::Span) -> Stmt {
    Stmt::new(StmtKind::Jump { kind, value: None }, span)
}

fn for_map(decl: &str, decl_span: ktrace_ast::Span, map: Expr, block: Block, span: ktrace_ast::Span) -> Stmt {
    Stmt::new(
        StmtKind::ForMap {
            decl: decl.to_string(),
            decl_span,
            map,
            block,
        },
        span,
    )
}

fn for_range(
    decl: &str,
    decl_span: ktrace_ast::Span,
    start: Expr,
    end: Expr,
    block: Block,
) -> Stmt {
    Stmt::new(
        StmtKind::ForRange {
            decl: decl.to_string(),
            decl_span,
            start,
            end,
            block,
        },
        decl_span,
    )
}

// ---------------------------------------------------------------------
// Jumps and loops
// ---------------------------------------------------------------------

#[test]
fn test_return_at_probe_top_level() {
    let mut tb = TB::new("i:s:1 { return; }");
    tb.probe("i:s:1", vec![jump(JumpKind::Return, tb.sp("return"))]);
    tb.assert_ok();
}

#[test]
fn test_break_outside_loop() {
    let mut tb = TB::new("i:s:1 { break; }");
    tb.probe("i:s:1", vec![jump(JumpKind::Break, tb.sp("break"))]);
    tb.assert_error("'break' statement is not allowed outside of a loop");
}

#[test]
fn test_continue_outside_loop() {
    let mut tb = TB::new("i:s:1 { continue; }");
    tb.probe("i:s:1", vec![jump(JumpKind::Continue, tb.sp("continue"))]);
    tb.assert_error("'continue' statement is not allowed outside of a loop");
}

#[test]
fn test_while_loop_with_break() {
    let mut tb = TB::new("i:s:1 { $a = 1; while ($a < 10) { if ($a > 50) { break } $a++ } }");
    let body = Block::new(
        vec![
            Stmt::new(
                StmtKind::If {
                    cond: Expr::binop(
                        ktrace_ast::ast::BinOp::Gt,
                        Expr::variable("a", tb.sp_nth("$a", 2)),
                        Expr::int(50, tb.sp("50")),
                        tb.sp("$a > 50"),
                    ),
                    then_block: Block::new(vec![jump(JumpKind::Break, tb.sp("break"))], z()),
                    else_block: None,
                },
                z(),
            ),
            Stmt::expr(Expr::unop(
                UnOp::Increment { post: true },
                Expr::variable("a", tb.sp_nth("$a", 3)),
                tb.sp("$a++"),
            )),
        ],
        z(),
    );
    tb.probe(
        "i:s:1",
        vec![
            Stmt::assign_var(Expr::variable("a", tb.sp("$a")), Expr::int(1, tb.sp("1"))),
            Stmt::new(
                StmtKind::While {
                    cond: Expr::binop(
                        ktrace_ast::ast::BinOp::Lt,
                        Expr::variable("a", tb.sp_nth("$a", 1)),
                        Expr::int(10, tb.sp("10")),
                        tb.sp("$a < 10"),
                    ),
                    block: body,
                },
                z(),
            ),
        ],
    );
    tb.assert_ok();
}

#[test]
fn test_dead_code_after_break_warns() {
    let mut tb = TB::new("i:s:1 { $a = 1; while ($a < 10) { break; $a++ } }");
    let body = Block::new(
        vec![
            jump(JumpKind::Break, tb.sp("break")),
            Stmt::expr(Expr::unop(
                UnOp::Increment { post: true },
                Expr::variable("a", tb.sp_nth("$a", 2)),
                tb.sp("$a++"),
            )),
        ],
        z(),
    );
    tb.probe(
        "i:s:1",
        vec![
            Stmt::assign_var(Expr::variable("a", tb.sp("$a")), Expr::int(1, tb.sp("1"))),
            Stmt::new(
                StmtKind::While {
                    cond: Expr::binop(
                        ktrace_ast::ast::BinOp::Lt,
                        Expr::variable("a", tb.sp_nth("$a", 1)),
                        Expr::int(10, tb.sp("10")),
                        tb.sp("$a < 10"),
                    ),
                    block: body,
                },
                z(),
            ),
        ],
    );
    tb.assert_warning("code after a 'break' statement will never be executed");
}

#[test]
fn test_print_inside_loop_warns() {
    let mut tb = TB::new("i:s:1 { $a = 1; while ($a < 10) { @ = $a++; print(@); } }");
    let body = Block::new(
        vec![
            Stmt::assign_map(
                Expr::map("", tb.sp("@ ")),
                Expr::unop(
                    UnOp::Increment { post: true },
                    Expr::variable("a", tb.sp_nth("$a", 2)),
                    tb.sp("$a++"),
                ),
            ),
            Stmt::expr(Expr::call(
                "print",
                vec![Expr::map("", tb.sp("@)"))],
                tb.sp("print(@)"),
            )),
        ],
        z(),
    );
    tb.probe(
        "i:s:1",
        vec![
            Stmt::assign_var(Expr::variable("a", tb.sp("$a")), Expr::int(1, tb.sp("1"))),
            Stmt::new(
                StmtKind::While {
                    cond: Expr::binop(
                        ktrace_ast::ast::BinOp::Lt,
                        Expr::variable("a", tb.sp_nth("$a", 1)),
                        Expr::int(10, tb.sp("10")),
                        tb.sp("$a < 10"),
                    ),
                    block: body,
                },
                z(),
            ),
        ],
    );
    tb.assert_warning("'print()' in a loop");
}

#[test]
fn test_unroll_count_bounds() {
    for (count, ok) in [(5i64, true), (101, false), (0, false)] {
        let src = format!("kprobe:f {{ unroll({count}) {{ print(1); }} }}");
        let mut tb = TB::new(&src);
        let block = Block::new(
            vec![Stmt::expr(Expr::call(
                "print",
                vec![Expr::int(1, tb.sp("1)"))],
                tb.sp("print(1)"),
            ))],
            z(),
        );
        tb.probe(
            "kprobe:f",
            vec![Stmt::new(
                StmtKind::Unroll {
                    count: Expr::int(count, tb.sp("unroll(")),
                    block,
                },
                z(),
            )],
        );
        if ok {
            tb.assert_ok();
        } else {
            tb.assert_error("unroll() count must be between 1 and 100");
        }
    }
}

#[test]
fn test_unroll_positional_parameter() {
    let mut tb = TB::new("kprobe:f { unroll($1) { print(1); } }");
    tb.env.params = vec!["10".into(), "hello".into()];
    let block = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::int(1, tb.sp("1)"))],
            tb.sp("print(1)"),
        ))],
        z(),
    );
    tb.probe(
        "kprobe:f",
        vec![Stmt::new(
            StmtKind::Unroll {
                count: Expr::new(ExprKind::PositionalParam(1), tb.sp("$1")),
                block,
            },
            z(),
        )],
    );
    tb.assert_ok();

    let mut tb = TB::new("kprobe:f { unroll($2) { print(1); } }");
    tb.env.params = vec!["10".into(), "hello".into()];
    let block = Block::new(vec![], z());
    tb.probe(
        "kprobe:f",
        vec![Stmt::new(
            StmtKind::Unroll {
                count: Expr::new(ExprKind::PositionalParam(2), tb.sp("$2")),
                block,
            },
            z(),
        )],
    );
    tb.assert_error("unroll() count must be a number, got \"hello\"");
}

// ---------------------------------------------------------------------
// for ($kv : @map)
// ---------------------------------------------------------------------

#[test]
fn test_for_map_induction_variable_typing() {
    // the induction variable is a (key, value) tuple
    let mut tb = TB::new("BEGIN { @map[0] = 1; for ($kv : @map) { print($kv.0); } }");
    let body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::tuple_access(
                Expr::variable("kv", tb.sp_nth("$kv", 1)),
                0,
                tb.sp("$kv.0"),
            )],
            tb.sp("print($kv.0)"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::int(1, tb.sp("1")),
            ),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                body,
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_ok();
    // the loop source expression carries the induction tuple type
    let ty = match &tb.ctx.root.probes[0].block.stmts[1].kind {
        StmtKind::ForMap { map, .. } => map.ty.clone(),
        _ => unreachable!(),
    };
    assert_eq!(
        ty,
        SizedType::tuple(vec![SizedType::int64(), SizedType::int64()])
    );
}

#[test]
fn test_for_map_composite_key_nests_tuple() {
    let mut tb = TB::new("BEGIN { @map[0,0] = 1; for ($kv : @map) { print($kv); } }");
    let body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::variable("kv", tb.sp_nth("$kv", 1))],
            tb.sp("print($kv)"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_map(
                Expr::map_keyed(
                    "map",
                    Expr::tuple(
                        vec![Expr::int(0, tb.sp("0")), Expr::int(0, tb.sp_nth("0", 1))],
                        tb.sp("0,0"),
                    ),
                    tb.sp("@map[0,0]"),
                ),
                Expr::int(1, tb.sp("1")),
            ),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                body,
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_ok();
    let ty = match &tb.ctx.root.probes[0].block.stmts[1].kind {
        StmtKind::ForMap { map, .. } => map.ty.clone(),
        _ => unreachable!(),
    };
    assert_eq!(
        ty,
        SizedType::tuple(vec![
            SizedType::tuple(vec![SizedType::int64(), SizedType::int64()]),
            SizedType::int64(),
        ])
    );
}

#[test]
fn test_for_map_scalar_source_rejected() {
    let mut tb = TB::new("BEGIN { @map = 1; for ($kv : @map) { } }");
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_map(Expr::map("map", tb.sp("@map")), Expr::int(1, tb.sp("1"))),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                Block::new(vec![], z()),
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_error(
        "@map has no explicit keys (scalar map), and cannot be used for iteration",
    );
}

#[test]
fn test_for_map_undefined_source() {
    let mut tb = TB::new("BEGIN { for ($kv : @map) { } }");
    tb.probe(
        "BEGIN",
        vec![for_map(
            "kv",
            tb.sp("$kv"),
            Expr::map("map", tb.sp("@map")),
            Block::new(vec![], z()),
            tb.sp("for"),
        )],
    );
    tb.assert_error("Undefined map: @map");
}

#[test]
fn test_for_map_defined_after_loop() {
    let mut tb = TB::new("BEGIN { for ($kv : @map) { @map[$kv.0] } @map[0] = 1; }");
    let body = Block::new(
        vec![Stmt::expr(Expr::map_keyed(
            "map",
            Expr::tuple_access(Expr::variable("kv", tb.sp_nth("$kv", 1)), 0, tb.sp("$kv.0")),
            tb.sp("@map[$kv.0]"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp("@map")),
                body,
                tb.sp("for"),
            ),
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::int(1, tb.sp("1")),
            ),
        ],
    );
    tb.assert_ok();
}

#[test]
fn test_for_map_rejects_aggregation_values() {
    for (ctor, args, display) in [
        ("hist", vec![10i64], "hist_t"),
        ("stats", vec![10], "stats_t"),
    ] {
        let src = format!("BEGIN {{ @map[0] = {ctor}(10); for ($kv : @map) {{ }} }}");
        let mut tb = TB::new(&src);
        let ctor_args = args.iter().map(|v| Expr::int(*v, z())).collect();
        tb.probe(
            "BEGIN",
            vec![
                Stmt::assign_map(
                    Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                    Expr::call(ctor, ctor_args, tb.sp(&format!("{ctor}(10)"))),
                ),
                for_map(
                    "kv",
                    tb.sp("$kv"),
                    Expr::map("map", tb.sp_nth("@map", 1)),
                    Block::new(vec![], z()),
                    tb.sp("for"),
                ),
            ],
        );
        tb.assert_error(&format!("Loop expression does not support type: {display}"));
    }
}

#[test]
fn test_for_map_castable_aggregation_is_iterable() {
    let mut tb = TB::new("BEGIN { @map[0] = count(); for ($kv : @map) { print($kv); } }");
    let body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::variable("kv", tb.sp_nth("$kv", 1))],
            tb.sp("print($kv)"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::call("count", vec![], tb.sp("count()")),
            ),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                body,
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_ok();
}

#[test]
fn test_for_map_shadowing_declaration() {
    let mut tb = TB::new("BEGIN { $kv = 1; @map[0] = 1; for ($kv : @map) { } }");
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_var(Expr::variable("kv", tb.sp("$kv")), Expr::int(1, tb.sp("1"))),
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::int(1, tb.sp_nth("1", 1)),
            ),
            for_map(
                "kv",
                tb.sp_nth("$kv", 1),
                Expr::map("map", tb.sp_nth("@map", 1)),
                Block::new(vec![], z()),
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_error("Loop declaration shadows existing variable: $kv");
}

#[test]
fn test_for_map_feature_gate() {
    let mut tb = TB::new("BEGIN { @map[0] = 1; for ($kv : @map) { print($kv); } }");
    tb.env.features = Features::none();
    let body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::variable("kv", tb.sp_nth("$kv", 1))],
            tb.sp("print($kv)"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::int(1, tb.sp("1")),
            ),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                body,
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_error("Missing required kernel feature: for_each_map_elem");
}

#[test]
fn test_for_map_ctx_builtin_banned() {
    let mut tb = TB::new("kprobe:f { @map[0] = 1; for ($kv : @map) { arg0 } }");
    let body = Block::new(
        vec![Stmt::expr(Expr::builtin("arg0", tb.sp("arg0")))],
        z(),
    );
    tb.probe(
        "kprobe:f",
        vec![
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::int(1, tb.sp("1")),
            ),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                body,
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_error("'arg0' builtin is not allowed in a for-loop");
}

#[test]
fn test_for_map_return_banned() {
    let mut tb = TB::new("BEGIN { @map[0] = 1; for ($kv : @map) { return; } }");
    let body = Block::new(vec![jump(JumpKind::Return, tb.sp("return"))], z());
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::int(1, tb.sp("1")),
            ),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                body,
                tb.sp("for"),
            ),
        ],
    );
    tb.assert_error("'return' statement is not allowed in a for-loop");
}

#[test]
fn test_for_map_body_variables_do_not_escape() {
    let mut tb = TB::new("BEGIN { @map[0] = 1; for ($kv : @map) { $var = 2; } print($var); }");
    let body = Block::new(
        vec![Stmt::assign_var(
            Expr::variable("var", tb.sp("$var")),
            Expr::int(2, tb.sp("2")),
        )],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_map(
                Expr::map_keyed("map", Expr::int(0, tb.sp("0")), tb.sp("@map[0]")),
                Expr::int(1, tb.sp("1")),
            ),
            for_map(
                "kv",
                tb.sp("$kv"),
                Expr::map("map", tb.sp_nth("@map", 1)),
                body,
                tb.sp("for"),
            ),
            Stmt::expr(Expr::call(
                "print",
                vec![Expr::variable("var", tb.sp_nth("$var", 1))],
                tb.sp("print($var)"),
            )),
        ],
    );
    tb.assert_error("Undefined or undeclared variable: $var");
}

// ---------------------------------------------------------------------
// for ($i : start..end)
// ---------------------------------------------------------------------

#[test]
fn test_for_range_basic() {
    let mut tb = TB::new("BEGIN { for ($i : 0..5) { @[$i] = $i * 2; } }");
    let body = Block::new(
        vec![Stmt::assign_map(
            Expr::map_keyed("", Expr::variable("i", tb.sp_nth("$i", 1)), tb.sp("@[$i]")),
            Expr::binop(
                ktrace_ast::ast::BinOp::Mul,
                Expr::variable("i", tb.sp_nth("$i", 2)),
                Expr::int(2, tb.sp("2")),
                tb.sp("$i * 2"),
            ),
        )],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![for_range(
            "i",
            tb.sp("$i"),
            Expr::int(0, tb.sp("0")),
            Expr::int(5, tb.sp("5")),
            body,
        )],
    );
    tb.assert_ok();
}

#[test]
fn test_for_range_reversed_endpoints_still_type_check() {
    // 5..0 simply iterates zero times
    let mut tb = TB::new("BEGIN { for ($i : 5..0) { print($i); } }");
    let body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::variable("i", tb.sp_nth("$i", 1))],
            tb.sp("print($i)"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![for_range(
            "i",
            tb.sp("$i"),
            Expr::int(5, tb.sp("5")),
            Expr::int(0, tb.sp("0")),
            body,
        )],
    );
    tb.assert_ok();
}

#[test]
fn test_for_range_requires_integer_endpoints() {
    let mut tb = TB::new("BEGIN { for ($i : \"str\"..5) { print($i); } }");
    let body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::variable("i", tb.sp_nth("$i", 1))],
            tb.sp("print($i)"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![for_range(
            "i",
            tb.sp("$i"),
            Expr::string("str", tb.sp("\"str\"")),
            Expr::int(5, tb.sp("5")),
            body,
        )],
    );
    tb.assert_error("Loop range requires an integer for the start value");

    let mut tb = TB::new("BEGIN { for ($i : 0..\"str\") { print($i); } }");
    let body = Block::new(vec![], z());
    tb.probe(
        "BEGIN",
        vec![for_range(
            "i",
            tb.sp("$i"),
            Expr::int(0, tb.sp("0")),
            Expr::string("str", tb.sp("\"str\"")),
            body,
        )],
    );
    tb.assert_error("Loop range requires an integer for the end value");
}

#[test]
fn test_for_range_shadowing() {
    let mut tb = TB::new("BEGIN { $i = 10; for ($i : 0..5) { print($i); } }");
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_var(Expr::variable("i", tb.sp("$i")), Expr::int(10, tb.sp("10"))),
            for_range(
                "i",
                tb.sp_nth("$i", 1),
                Expr::int(0, tb.sp("0")),
                Expr::int(5, tb.sp("5")),
                Block::new(vec![], z()),
            ),
        ],
    );
    tb.assert_error("Loop declaration shadows existing variable: $i");
}

#[test]
fn test_for_range_induction_out_of_scope_after() {
    let mut tb = TB::new("BEGIN { for ($i : 0..5) { print($i); } print($i); }");
    let body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::variable("i", tb.sp_nth("$i", 1))],
            tb.sp("print($i)"),
        ))],
        z(),
    );
    tb.probe(
        "BEGIN",
        vec![
            for_range(
                "i",
                tb.sp("$i"),
                Expr::int(0, tb.sp("0")),
                Expr::int(5, tb.sp("5")),
                body,
            ),
            Stmt::expr(Expr::call(
                "print",
                vec![Expr::variable("i", tb.sp_nth("$i", 2))],
                tb.sp_nth("print($i)", 1),
            )),
        ],
    );
    tb.assert_error("Undefined or undeclared variable: $i");
}

#[test]
fn test_for_range_nested_uses_outer_induction() {
    let mut tb = TB::new("BEGIN { for ($i : 0..5) { for ($j : 0..$i) { print($j); } } }");
    let inner_body = Block::new(
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::variable("j", tb.sp_nth("$j", 1))],
            tb.sp("print($j)"),
        ))],
        z(),
    );
    let inner = for_range(
        "j",
        tb.sp("$j"),
        Expr::int(0, tb.sp_nth("0", 1)),
        Expr::variable("i", tb.sp_nth("$i", 1)),
        inner_body,
    );
    tb.probe(
        "BEGIN",
        vec![for_range(
            "i",
            tb.sp("$i"),
            Expr::int(0, tb.sp("0")),
            Expr::int(5, tb.sp("5")),
            Block::new(vec![inner], z()),
        )],
    );
    tb.assert_ok();
}

#[test]
fn test_for_range_ctx_access_banned() {
    let mut tb = TB::new("kprobe:f { for ($i : 0..5) { arg0 } }");
    let body = Block::new(vec![Stmt::expr(Expr::builtin("arg0", tb.sp("arg0")))], z());
    tb.probe(
        "kprobe:f",
        vec![for_range(
            "i",
            tb.sp("$i"),
            Expr::int(0, tb.sp("0")),
            Expr::int(5, tb.sp("5")),
            body,
        )],
    );
    tb.assert_error("'arg0' builtin is not allowed in a for-loop");
}

// ---------------------------------------------------------------------
// Subprograms
// ---------------------------------------------------------------------

fn subprog(tb: &TB, name: &str, params: Vec<(&str, TypeSpec)>, ret: TypeSpec, block: Block) -> Subprog {
    Subprog {
        name: name.to_string(),
        params: params
            .into_iter()
            .map(|(n, t)| (n.to_string(), t))
            .collect(),
        return_ty: ret,
        block,
        span: tb.sp("fn "),
    }
}

#[test]
fn test_subprog_void_return() {
    let mut tb = TB::new("fn f(): void { return; }");
    let block = Block::new(vec![jump(JumpKind::Return, tb.sp("return"))], z());
    let f = subprog(&tb, "f", vec![], TypeSpec::ident("void"), block);
    tb.ctx.root.functions.push(f);
    tb.assert_ok();
}

#[test]
fn test_subprog_void_cannot_return_value() {
    let mut tb = TB::new("fn f(): void { return 1; }");
    let ret = Stmt::new(
        StmtKind::Jump {
            kind: JumpKind::Return,
            value: Some(Expr::int(1, tb.sp("1"))),
        },
        tb.sp("return 1"),
    );
    let f = subprog(&tb, "f", vec![], TypeSpec::ident("void"), Block::new(vec![ret], z()));
    tb.ctx.root.functions.push(f);
    tb.assert_error("Function f is of type void, cannot return int64");
}

#[test]
fn test_subprog_typed_cannot_return_void() {
    let mut tb = TB::new("fn f(): int64 { return; }");
    let block = Block::new(vec![jump(JumpKind::Return, tb.sp("return"))], z());
    let f = subprog(&tb, "f", vec![], TypeSpec::ident("int64"), block);
    tb.ctx.root.functions.push(f);
    tb.assert_error("Function f is of type int64, cannot return void");
}

#[test]
fn test_subprog_parameter_types_flow_to_return() {
    let mut tb = TB::new("fn f($a : int64): string { return $a; }");
    let ret = Stmt::new(
        StmtKind::Jump {
            kind: JumpKind::Return,
            value: Some(Expr::variable("a", tb.sp_nth("$a", 1))),
        },
        tb.sp("return $a"),
    );
    let f = subprog(
        &tb,
        "f",
        vec![("a", TypeSpec::ident("int64"))],
        TypeSpec::ident("string"),
        Block::new(vec![ret], z()),
    );
    tb.ctx.root.functions.push(f);
    tb.assert_error("Function f is of type string, cannot return int64");
}

#[test]
fn test_subprog_can_use_maps() {
    let mut tb = TB::new("fn f(): int64 { @a = 0; return @a + 1; }");
    let ret = Stmt::new(
        StmtKind::Jump {
            kind: JumpKind::Return,
            value: Some(Expr::binop(
                ktrace_ast::ast::BinOp::Add,
                Expr::map("a", tb.sp_nth("@a", 1)),
                Expr::int(1, tb.sp("1")),
                tb.sp("@a + 1"),
            )),
        },
        tb.sp("return @a + 1"),
    );
    let block = Block::new(
        vec![
            Stmt::assign_map(Expr::map("a", tb.sp("@a")), Expr::int(0, tb.sp("0"))),
            ret,
        ],
        z(),
    );
    let f = subprog(&tb, "f", vec![], TypeSpec::ident("int64"), block);
    tb.ctx.root.functions.push(f);
    tb.assert_ok();
}

#[test]
fn test_subprog_probe_builtin_banned() {
    let mut tb = TB::new("fn f(): int64 { return func; }");
    let ret = Stmt::new(
        StmtKind::Jump {
            kind: JumpKind::Return,
            value: Some(Expr::builtin("func", tb.sp("func;"))),
        },
        tb.sp("return func"),
    );
    let f = subprog(&tb, "f", vec![], TypeSpec::ident("int64"), Block::new(vec![ret], z()));
    tb.ctx.root.functions.push(f);
    assert!(!tb.run());
    let messages = tb.messages();
    assert!(messages
        .iter()
        .any(|m| m.contains("Builtin func not supported outside probe")));
    assert!(messages
        .iter()
        .any(|m| m.contains("Function f is of type int64, cannot return none")));
}

#[test]
fn test_subprog_global_builtins_allowed() {
    let mut tb = TB::new("fn f(): uint64 { return nsecs; }");
    let ret = Stmt::new(
        StmtKind::Jump {
            kind: JumpKind::Return,
            value: Some(Expr::builtin("nsecs", tb.sp("nsecs"))),
        },
        tb.sp("return nsecs"),
    );
    let f = subprog(&tb, "f", vec![], TypeSpec::ident("uint64"), Block::new(vec![ret], z()));
    tb.ctx.root.functions.push(f);
    tb.assert_ok();
}

// ---------------------------------------------------------------------
// Probe families and attach points
// ---------------------------------------------------------------------

#[test]
fn test_duplicate_begin_probe() {
    let mut tb = TB::new("BEGIN { 1 } BEGIN { 2 }");
    tb.probe("BEGIN", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.probe("BEGIN", vec![Stmt::expr(Expr::int(2, tb.sp("2")))]);
    tb.assert_error("More than one BEGIN probe defined");
}

#[test]
fn test_self_signal_probe_validation() {
    let mut tb = TB::new("self:signal:SIGUSR1 { 1 }");
    tb.probe("self:signal:SIGUSR1", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_ok();

    let mut tb = TB::new("self:signal:sighup { 1 }");
    tb.probe("self:signal:sighup", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_error("sighup is not a supported signal");

    let mut tb = TB::new("self:keypress:space { 1 }");
    tb.probe("self:keypress:space", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_error("keypress is not a supported trigger");
}

#[test]
fn test_watchpoint_constraints() {
    let mut tb = TB::new("watchpoint:0x1234:8:rw { 1 }");
    tb.env.has_procmon = true;
    tb.probe("watchpoint:0x1234:8:rw", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_ok();

    let mut tb = TB::new("watchpoint:0x1234:9:rw { 1 }");
    tb.env.has_procmon = true;
    tb.probe("watchpoint:0x1234:9:rw", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_error("watchpoint length must be one of 1, 2, 4, 8");

    let mut tb = TB::new("watchpoint:0x0:8:rw { 1 }");
    tb.env.has_procmon = true;
    tb.probe("watchpoint:0x0:8:rw", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_error("watchpoint cannot be attached to address 0");

    let mut tb = TB::new("watchpoint:0x1234:8:rx { 1 }");
    tb.env.has_procmon = true;
    tb.probe("watchpoint:0x1234:8:rx", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_error("Invalid watchpoint mode: rx");
}

#[test]
fn test_asyncwatchpoint_rejects_absolute_address() {
    let mut tb = TB::new("asyncwatchpoint:0x1234:8:rw { 1 }");
    tb.env.has_procmon = true;
    tb.probe(
        "asyncwatchpoint:0x1234:8:rw",
        vec![Stmt::expr(Expr::int(1, tb.sp("1")))],
    );
    tb.assert_error("asyncwatchpoint cannot be attached to an absolute address");
}

#[test]
fn test_symbolic_watchpoint_needs_process_monitor() {
    let mut tb = TB::new("watchpoint:func1+arg2:8:rw { 1 }");
    tb.probe(
        "watchpoint:func1+arg2:8:rw",
        vec![Stmt::expr(Expr::int(1, tb.sp("1")))],
    );
    tb.assert_error("watchpoints on function arguments require a traced process");

    let mut tb = TB::new("watchpoint:func1+arg99999:8:rw { 1 }");
    tb.env.has_procmon = true;
    tb.probe(
        "watchpoint:func1+arg99999:8:rw",
        vec![Stmt::expr(Expr::int(1, tb.sp("1")))],
    );
    tb.assert_error("Invalid watchpoint argument: arg99999");
}

#[test]
fn test_iter_allows_single_attach_point_only() {
    let mut tb = TB::new("iter:task,iter:task_file { 1 }");
    tb.probe(
        "iter:task,iter:task_file",
        vec![Stmt::expr(Expr::int(1, tb.sp("1")))],
    );
    tb.assert_error("Only single iter attach point is allowed.");
}

#[test]
fn test_profile_unit_validation() {
    let mut tb = TB::new("profile:unit:100 { 1 }");
    tb.probe("profile:unit:100", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_error("unit is not a valid unit for profile");

    let mut tb = TB::new("profile:hz:997 { 1 }");
    tb.probe("profile:hz:997", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_ok();
}

#[test]
fn test_fentry_requires_kernel_support() {
    let mut tb = TB::new("fentry:f { 1 }");
    tb.env.features = Features::none();
    tb.probe("fentry:f", vec![Stmt::expr(Expr::int(1, tb.sp("1")))]);
    tb.assert_error("fentry/fexit not available for your kernel version.");
}

#[test]
fn test_func_builtin_needs_get_func_ip_on_kretprobe() {
    let mut tb = TB::new("kretprobe:f { func }");
    tb.env.features = Features {
        get_func_ip: false,
        ..Features::all()
    };
    tb.probe("kretprobe:f", vec![Stmt::expr(Expr::builtin("func", tb.sp("func")))]);
    tb.assert_error(
        "The 'func' builtin is not available for kretprobes on kernels without the \
         get_func_ip BPF feature. Consider using the 'probe' builtin instead.",
    );
}

#[test]
fn test_retval_family_restriction() {
    let mut tb = TB::new("kprobe:f { retval }");
    tb.probe("kprobe:f", vec![Stmt::expr(Expr::builtin("retval", tb.sp("retval")))]);
    tb.assert_error("The retval builtin can only be used with");
}

#[test]
fn test_unknown_identifier() {
    let mut tb = TB::new("kprobe:f { fake }");
    tb.probe("kprobe:f", vec![Stmt::expr(Expr::ident("fake", tb.sp("fake")))]);
    assert!(!tb.run());
    assert_eq!(
        tb.rendered(),
        "stdin:1:12-16: ERROR: Unknown identifier: 'fake'\n\
         kprobe:f { fake }\n\
         \u{20}          ^^^^\n"
    );
}

// ---------------------------------------------------------------------
// args
// ---------------------------------------------------------------------

#[test]
fn test_args_in_tracepoint_resolves_fields() {
    let mut tb = TB::new("tracepoint:sched:sched_one { args.common_field }");
    tb.record(
        "struct _tracepoint_sched_sched_one",
        vec![("common_field", SizedType::int64(), 0)],
    );
    tb.probe(
        "tracepoint:sched:sched_one",
        vec![Stmt::expr(Expr::field(
            Expr::builtin("args", tb.sp("args")),
            "common_field",
            false,
            tb.sp("args.common_field"),
        ))],
    );
    tb.assert_ok();
}

#[test]
fn test_args_arrow_back_compat() {
    let mut tb = TB::new("tracepoint:sched:sched_one { args->common_field }");
    tb.record(
        "struct _tracepoint_sched_sched_one",
        vec![("common_field", SizedType::int64(), 0)],
    );
    tb.probe(
        "tracepoint:sched:sched_one",
        vec![Stmt::expr(Expr::field(
            Expr::builtin("args", tb.sp("args")),
            "common_field",
            true,
            tb.sp("args->common_field"),
        ))],
    );
    tb.assert_ok();
}

#[test]
fn test_args_unknown_tracepoint_field() {
    let mut tb = TB::new("tracepoint:sched:sched_one { args.not_a_field }");
    tb.record(
        "struct _tracepoint_sched_sched_one",
        vec![("common_field", SizedType::int64(), 0)],
    );
    tb.probe(
        "tracepoint:sched:sched_one",
        vec![Stmt::expr(Expr::field(
            Expr::builtin("args", tb.sp("args")),
            "not_a_field",
            false,
            tb.sp("args.not_a_field"),
        ))],
    );
    tb.assert_error(
        "'struct _tracepoint_sched_sched_one' has no field named 'not_a_field'",
    );
}

#[test]
fn test_args_unknown_fexit_parameter() {
    let mut tb = TB::new("fexit:func_1 { $x = args.foo; }");
    tb.record("struct func_1_args", vec![("a", SizedType::int64(), 0)]);
    tb.probe(
        "fexit:func_1",
        vec![Stmt::assign_var(
            Expr::variable("x", tb.sp("$x")),
            Expr::field(
                Expr::builtin("args", tb.sp("args")),
                "foo",
                false,
                tb.sp("args.foo"),
            ),
        )],
    );
    tb.assert_error("Can't find function parameter foo");
}

#[test]
fn test_args_family_restriction() {
    let mut tb = TB::new("iter:task { $x = args.foo; }");
    tb.probe(
        "iter:task",
        vec![Stmt::assign_var(
            Expr::variable("x", tb.sp("$x")),
            Expr::field(
                Expr::builtin("args", tb.sp("args")),
                "foo",
                false,
                tb.sp("args.foo"),
            ),
        )],
    );
    tb.assert_error(
        "The args builtin can only be used with tracepoint/fentry/uprobe probes \
         (iter used here)",
    );
}

#[test]
fn test_args_mixed_probe_families() {
    let mut tb = TB::new("fentry:func_1,tracepoint:sched:sched_one { args }");
    tb.probe(
        "fentry:func_1,tracepoint:sched:sched_one",
        vec![Stmt::expr(Expr::builtin("args", tb.sp("args")))],
    );
    tb.assert_error(
        "The args builtin can only be used within the context of a single probe type",
    );
}

#[test]
fn test_args_banned_in_plain_kprobe() {
    let mut tb = TB::new("kprobe:f { args.foo }");
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::field(
            Expr::builtin("args", tb.sp("args")),
            "foo",
            false,
            tb.sp("args.foo"),
        ))],
    );
    tb.assert_error("The args builtin can only be used with");
}

// ---------------------------------------------------------------------
// Field access and casts
// ---------------------------------------------------------------------

#[test]
fn test_field_access_through_pointer_and_value() {
    let mut tb = TB::new(
        "struct type1 { int field; } kprobe:f { ((struct type1*)0)->field; $x = (struct type1*)0; $x.field }",
    );
    tb.record("struct type1", vec![("field", SizedType::integer(32, true), 0)]);
    let arrow = Expr::field(
        Expr::cast(
            TypeSpec::pointer(TypeSpec::record("struct type1")),
            Expr::int(0, tb.sp("0")),
            tb.sp("(struct type1*)0"),
        ),
        "field",
        true,
        tb.sp("((struct type1*)0)->field"),
    );
    let dot_on_pointer = Expr::field(
        Expr::variable("x", tb.sp_nth("$x", 1)),
        "field",
        false,
        tb.sp("$x.field"),
    );
    tb.probe(
        "kprobe:f",
        vec![
            Stmt::expr(arrow),
            Stmt::assign_var(
                Expr::variable("x", tb.sp("$x")),
                Expr::cast(
                    TypeSpec::pointer(TypeSpec::record("struct type1")),
                    Expr::int(0, tb.sp_nth("0", 1)),
                    tb.sp_nth("(struct type1*)0", 1),
                ),
            ),
            Stmt::expr(dot_on_pointer),
        ],
    );
    tb.assert_error("Can not access field 'field' on a pointer");
}

#[test]
fn test_field_access_unknown_field() {
    let mut tb = TB::new("struct type1 { int field; } kprobe:f { ((struct type1*)0)->blah }");
    tb.record("struct type1", vec![("field", SizedType::integer(32, true), 0)]);
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::field(
            Expr::cast(
                TypeSpec::pointer(TypeSpec::record("struct type1")),
                Expr::int(0, tb.sp("0")),
                tb.sp("(struct type1*)0"),
            ),
            "blah",
            true,
            tb.sp("((struct type1*)0)->blah"),
        ))],
    );
    tb.assert_error("'struct type1' has no field named 'blah'");
}

#[test]
fn test_arrow_on_integer() {
    let mut tb = TB::new("struct type1 { int field; } kprobe:f { 1234->field }");
    tb.record("struct type1", vec![("field", SizedType::integer(32, true), 0)]);
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::field(
            Expr::int(1234, tb.sp("1234")),
            "field",
            true,
            tb.sp("1234->field"),
        ))],
    );
    tb.assert_error("Can not access field 'field' on expression of type 'int64'");
}

#[test]
fn test_deref_of_ctx_pointer_marks_ctx_access() {
    let mut tb = TB::new("kprobe:f { $x = (int64*)ctx; $a = *$x; }");
    let cast = Expr::cast(
        TypeSpec::pointer(TypeSpec::ident("int64")),
        Expr::builtin("ctx", tb.sp("ctx")),
        tb.sp("(int64*)ctx"),
    );
    tb.probe(
        "kprobe:f",
        vec![
            Stmt::assign_var(Expr::variable("x", tb.sp("$x")), cast),
            Stmt::assign_var(
                Expr::variable("a", tb.sp("$a")),
                Expr::unop(UnOp::Deref, Expr::variable("x", tb.sp_nth("$x", 1)), tb.sp("*$x")),
            ),
        ],
    );
    tb.assert_ok();
    let deref_ty = match &tb.ctx.root.probes[0].block.stmts[1].kind {
        StmtKind::AssignVar { expr, .. } => expr.ty.clone(),
        _ => unreachable!(),
    };
    assert!(deref_ty.ctx, "value derived from ctx must carry the ctx tag");
}

#[test]
fn test_ctx_cast_family_restriction() {
    let mut tb = TB::new("tracepoint:sched:one { @ = (uint64)ctx; }");
    tb.probe(
        "tracepoint:sched:one",
        vec![Stmt::assign_map(
            Expr::map("", tb.sp("@ ")),
            Expr::cast(
                TypeSpec::ident("uint64"),
                Expr::builtin("ctx", tb.sp("ctx")),
                tb.sp("(uint64)ctx"),
            ),
        )],
    );
    tb.assert_error("The ctx builtin can not be used with tracepoint probes");
}

#[test]
fn test_cast_to_c_integer_suggests_sized_form() {
    let src = "BEGIN { (char)cpu }";
    let mut tb = TB::new(src);
    tb.probe(
        "BEGIN",
        vec![Stmt::expr(Expr::cast(
            TypeSpec::ident("char"),
            Expr::builtin("cpu", tb.sp("cpu")),
            tb.sp("(char)cpu"),
        ))],
    );
    assert!(!tb.run());
    let rendered = tb.rendered();
    assert!(rendered.contains("ERROR: Cannot resolve unknown type \"char\""));
    assert!(rendered.contains("ERROR: Cannot cast to \"char\""));
    assert!(rendered.contains("HINT: Did you mean \"int8\"?"));
}

#[test]
fn test_cast_to_unknown_struct_pointer() {
    let mut tb = TB::new("BEGIN { (struct faketype *)cpu }");
    tb.probe(
        "BEGIN",
        vec![Stmt::expr(Expr::cast(
            TypeSpec::pointer(TypeSpec::record("struct faketype")),
            Expr::builtin("cpu", tb.sp("cpu")),
            tb.sp("(struct faketype *)cpu"),
        ))],
    );
    tb.assert_error("Cannot resolve unknown type \"struct faketype\"");
}

#[test]
fn test_cast_struct_by_value_rejected() {
    let mut tb = TB::new("struct mytype { int field; } BEGIN { (struct mytype)cpu }");
    tb.record("struct mytype", vec![("field", SizedType::integer(32, true), 0)]);
    tb.probe(
        "BEGIN",
        vec![Stmt::expr(Expr::cast(
            TypeSpec::record("struct mytype"),
            Expr::builtin("cpu", tb.sp("cpu")),
            tb.sp("(struct mytype)cpu"),
        ))],
    );
    tb.assert_error("Cannot cast to \"struct mytype\"");
}

#[test]
fn test_cast_record_value_to_int_rejected() {
    let mut tb =
        TB::new("struct mytype { int field; } BEGIN { $s = (struct mytype *)cpu; (uint32)*$s; }");
    tb.record("struct mytype", vec![("field", SizedType::integer(32, true), 0)]);
    tb.probe(
        "BEGIN",
        vec![
            Stmt::assign_var(
                Expr::variable("s", tb.sp("$s")),
                Expr::cast(
                    TypeSpec::pointer(TypeSpec::record("struct mytype")),
                    Expr::builtin("cpu", tb.sp("cpu")),
                    tb.sp("(struct mytype *)cpu"),
                ),
            ),
            Stmt::expr(Expr::cast(
                TypeSpec::ident("uint32"),
                Expr::unop(UnOp::Deref, Expr::variable("s", tb.sp_nth("$s", 1)), tb.sp("*$s")),
                tb.sp("(uint32)*$s"),
            )),
        ],
    );
    assert!(!tb.run());
    let messages = tb.messages();
    assert!(messages
        .iter()
        .any(|m| m.contains("Cannot cast from struct type \"struct mytype\"")));
    assert!(messages
        .iter()
        .any(|m| m.contains("Cannot cast from \"struct mytype\" to \"uint32\"")));
}

#[test]
fn test_bool_cast_sources() {
    let mut tb = TB::new("kprobe:f { $a = (bool)1; $b = (bool)comm; $c = (bool)kstack; }");
    tb.probe(
        "kprobe:f",
        vec![
            Stmt::assign_var(
                Expr::variable("a", tb.sp("$a")),
                Expr::cast(TypeSpec::ident("bool"), Expr::int(1, tb.sp("1")), tb.sp("(bool)1")),
            ),
            Stmt::assign_var(
                Expr::variable("b", tb.sp("$b")),
                Expr::cast(
                    TypeSpec::ident("bool"),
                    Expr::builtin("comm", tb.sp("comm")),
                    tb.sp("(bool)comm"),
                ),
            ),
            Stmt::assign_var(
                Expr::variable("c", tb.sp("$c")),
                Expr::cast(
                    TypeSpec::ident("bool"),
                    Expr::builtin("kstack", tb.sp("kstack")),
                    tb.sp("(bool)kstack"),
                ),
            ),
        ],
    );
    tb.assert_error("Cannot cast from \"kstack\" to \"bool\"");
}

#[test]
fn test_int_array_cast_sizes() {
    let mut tb = TB::new("kprobe:f { @ = (int8[8])1; }");
    tb.probe(
        "kprobe:f",
        vec![Stmt::assign_map(
            Expr::map("", tb.sp("@ ")),
            Expr::cast(
                TypeSpec::array(TypeSpec::ident("int8"), Some(8)),
                Expr::int(1, tb.sp("1")),
                tb.sp("(int8[8])1"),
            ),
        )],
    );
    tb.assert_ok();

    let mut tb = TB::new("kprobe:f { @ = (int8[4])1; }");
    tb.probe(
        "kprobe:f",
        vec![Stmt::assign_map(
            Expr::map("", tb.sp("@ ")),
            Expr::cast(
                TypeSpec::array(TypeSpec::ident("int8"), Some(4)),
                Expr::int(1, tb.sp("1")),
                tb.sp("(int8[4])1"),
            ),
        )],
    );
    tb.assert_error("Cannot cast from \"int64\" to \"int8[4]\"");
}

#[test]
fn test_int_array_cast_infers_length() {
    let mut tb = TB::new("kprobe:f { @ = (int8[])(int16)1; }");
    tb.probe(
        "kprobe:f",
        vec![Stmt::assign_map(
            Expr::map("", tb.sp("@ ")),
            Expr::cast(
                TypeSpec::array(TypeSpec::ident("int8"), None),
                Expr::cast(TypeSpec::ident("int16"), Expr::int(1, tb.sp("1")), tb.sp("(int16)1")),
                tb.sp("(int8[])(int16)1"),
            ),
        )],
    );
    tb.assert_ok();
    let ty = match &tb.ctx.root.probes[0].block.stmts[0].kind {
        StmtKind::AssignMap { map, .. } => map.ty.clone(),
        _ => unreachable!(),
    };
    assert_eq!(ty, SizedType::array(SizedType::integer(8, true), 2));
}

#[test]
fn test_array_to_int_cast_total_bits() {
    let mut tb = TB::new("struct Foo { char x[8]; } kprobe:f { @ = (int64)$s->x; $s = (struct Foo*)0; }");
    tb.record(
        "struct Foo",
        vec![("x", SizedType::array(SizedType::integer(8, false), 8), 0)],
    );
    tb.probe(
        "kprobe:f",
        vec![
            Stmt::assign_var(
                Expr::variable("s", tb.sp("$s")),
                Expr::cast(
                    TypeSpec::pointer(TypeSpec::record("struct Foo")),
                    Expr::int(0, tb.sp("0")),
                    tb.sp("(struct Foo*)0"),
                ),
            ),
            Stmt::assign_map(
                Expr::map("", tb.sp("@ ")),
                Expr::cast(
                    TypeSpec::ident("int64"),
                    Expr::field(
                        Expr::variable("s", tb.sp_nth("$s", 1)),
                        "x",
                        true,
                        tb.sp("$s->x"),
                    ),
                    tb.sp("(int64)$s->x"),
                ),
            ),
        ],
    );
    tb.assert_ok();

    let mut tb = TB::new("struct Foo { char x[8]; } kprobe:f { $s = (struct Foo*)0; @ = (int32)$s->x; }");
    tb.record(
        "struct Foo",
        vec![("x", SizedType::array(SizedType::integer(8, false), 8), 0)],
    );
    tb.probe(
        "kprobe:f",
        vec![
            Stmt::assign_var(
                Expr::variable("s", tb.sp("$s")),
                Expr::cast(
                    TypeSpec::pointer(TypeSpec::record("struct Foo")),
                    Expr::int(0, tb.sp("0")),
                    tb.sp("(struct Foo*)0"),
                ),
            ),
            Stmt::assign_map(
                Expr::map("", tb.sp("@ ")),
                Expr::cast(
                    TypeSpec::ident("int32"),
                    Expr::field(
                        Expr::variable("s", tb.sp_nth("$s", 1)),
                        "x",
                        true,
                        tb.sp("$s->x"),
                    ),
                    tb.sp("(int32)$s->x"),
                ),
            ),
        ],
    );
    tb.assert_error("Cannot cast from \"uint8[8]\" to \"int32\"");
}

#[test]
fn test_enum_casts() {
    let mut tb = TB::new("enum named { a = 1, b } kprobe:f { print((enum named)3); }");
    let mut variants = indexmap::IndexMap::new();
    variants.insert("a".to_string(), 1u64);
    variants.insert("b".to_string(), 2u64);
    tb.ctx.records.add_enum("named", variants);
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::cast(
                TypeSpec::Enum("named".to_string()),
                Expr::int(3, tb.sp("3")),
                tb.sp("(enum named)3"),
            )],
            tb.sp("print((enum named)3)"),
        ))],
    );
    tb.assert_error("Enum: named doesn't contain a variant value of 3");

    let mut tb = TB::new("enum Foo { a = 1 } kprobe:f { print((enum Bar)1); }");
    let mut variants = indexmap::IndexMap::new();
    variants.insert("a".to_string(), 1u64);
    tb.ctx.records.add_enum("Foo", variants);
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::cast(
                TypeSpec::Enum("Bar".to_string()),
                Expr::int(1, tb.sp("1)")),
                tb.sp("(enum Bar)1"),
            )],
            tb.sp("print((enum Bar)1)"),
        ))],
    );
    tb.assert_error("Unknown enum: Bar");
}

#[test]
fn test_enum_variant_identifier_resolves() {
    let mut tb = TB::new("enum named { a = 1, b } kprobe:f { printf(\"%d\", a); }");
    let mut variants = indexmap::IndexMap::new();
    variants.insert("a".to_string(), 1u64);
    variants.insert("b".to_string(), 2u64);
    tb.ctx.records.add_enum("named", variants);
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::call(
            "printf",
            vec![
                Expr::string("%d", tb.sp("\"%d\"")),
                Expr::ident("a", tb.sp("a)")),
            ],
            tb.sp("printf(\"%d\", a)"),
        ))],
    );
    tb.assert_ok();
}

// ---------------------------------------------------------------------
// Positional parameters
// ---------------------------------------------------------------------

#[test]
fn test_numeric_parameter_used_as_int() {
    let mut tb = TB::new("kprobe:f { printf(\"%d\", $1); }");
    tb.env.params = vec!["123".into(), "hello".into()];
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::call(
            "printf",
            vec![
                Expr::string("%d", tb.sp("\"%d\"")),
                Expr::new(ExprKind::PositionalParam(1), tb.sp("$1")),
            ],
            tb.sp("printf(\"%d\", $1)"),
        ))],
    );
    tb.assert_ok();
}

#[test]
fn test_non_numeric_parameter_used_numerically() {
    let mut tb = TB::new("kprobe:f { printf(\"%d\", $2); }");
    tb.env.params = vec!["123".into(), "hello".into()];
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::call(
            "printf",
            vec![
                Expr::string("%d", tb.sp("\"%d\"")),
                Expr::new(ExprKind::PositionalParam(2), tb.sp("$2")),
            ],
            tb.sp("printf(\"%d\", $2)"),
        ))],
    );
    tb.assert_error("$2 used numerically but given \"hello\"");
}

#[test]
fn test_any_parameter_valid_in_str() {
    let mut tb = TB::new("kprobe:f { printf(\"%s\", str($2)); }");
    tb.env.params = vec!["123".into(), "hello".into()];
    let str_call = Expr::call(
        "str",
        vec![Expr::new(ExprKind::PositionalParam(2), tb.sp("$2"))],
        tb.sp("str($2)"),
    );
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::call(
            "printf",
            vec![Expr::string("%s", tb.sp("\"%s\"")), str_call],
            tb.sp("printf(\"%s\", str($2))"),
        ))],
    );
    tb.assert_ok();
}

#[test]
fn test_empty_parameter_warns() {
    let mut tb = TB::new("BEGIN { print(($1, $2)) }");
    tb.env.params = vec!["1".into()];
    tb.probe(
        "BEGIN",
        vec![Stmt::expr(Expr::call(
            "print",
            vec![Expr::tuple(
                vec![
                    Expr::new(ExprKind::PositionalParam(1), tb.sp("$1")),
                    Expr::new(ExprKind::PositionalParam(2), tb.sp("$2")),
                ],
                tb.sp("($1, $2)"),
            )],
            tb.sp("print(($1, $2))"),
        ))],
    );
    tb.assert_warning("Positional parameter $2 is empty or not provided.");
}

#[test]
fn test_param_count_is_numeric() {
    let mut tb = TB::new("kprobe:f { printf(\"%d\", $#); }");
    tb.env.params = vec!["10".into()];
    tb.probe(
        "kprobe:f",
        vec![Stmt::expr(Expr::call(
            "printf",
            vec![
                Expr::string("%d", tb.sp("\"%d\"")),
                Expr::new(ExprKind::ParamCount, tb.sp("$#")),
            ],
            tb.sp("printf(\"%d\", $#)"),
        ))],
    );
    tb.assert_ok();
}
