//! Parser tests

use kernelctx::ast::*;
use kernelctx::parser::parse_source;

fn parse(source: &str) -> Program {
    parse_source(source).unwrap()
}

fn parse_err(source: &str) -> String {
    parse_source(source).unwrap_err().message
}

fn kernel_body(body: &str) -> Vec<Stmt> {
    let source = format!("__kernel void k(__global int* out, const uint n) {{ {} }}", body);
    parse(&source).kernels.remove(0).body.stmts
}

#[test]
fn test_parse_empty_program() {
    assert!(parse("").kernels.is_empty());
}

#[test]
fn test_parse_kernel_signature() {
    let program = parse(
        "__kernel void scale(__global float* out, __global const float* in, const float k) { }",
    );
    let kernel = program.kernel("scale").unwrap();
    assert_eq!(kernel.params.len(), 3);

    assert_eq!(kernel.params[0].ty, ScalarType::Float);
    assert_eq!(kernel.params[0].kind, ParamKind::Pointer(AddressSpace::Global));
    assert!(!kernel.params[0].is_const);

    assert!(kernel.params[1].is_const);
    assert_eq!(kernel.params[2].kind, ParamKind::Value);
    assert_eq!(kernel.params[2].name, "k");
}

#[test]
fn test_parse_multiple_kernels() {
    let program = parse("kernel void a() { } kernel void b(global int* x) { x[0] = 1; }");
    let names: Vec<&str> = program.kernels.iter().map(|k| k.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert!(program.kernel("c").is_none());
}

#[test]
fn test_parse_unsigned_spellings() {
    let program = parse("__kernel void k(unsigned int a, unsigned char b, size_t c) { }");
    let types: Vec<ScalarType> = program.kernels[0].params.iter().map(|p| p.ty).collect();
    assert_eq!(types, vec![ScalarType::UInt, ScalarType::UChar, ScalarType::ULong]);
}

#[test]
fn test_parse_declarations() {
    let stmts = kernel_body("int a = 1, b; float c = 2.5f;");
    let Stmt::Decl { ty, declarators } = &stmts[0] else {
        panic!("expected declaration");
    };
    assert_eq!(*ty, ScalarType::Int);
    assert_eq!(declarators.len(), 2);
    assert!(declarators[0].init.is_some());
    assert!(declarators[1].init.is_none());
    assert!(matches!(&stmts[1], Stmt::Decl { ty: ScalarType::Float, .. }));
}

#[test]
fn test_parse_control_flow() {
    let stmts = kernel_body(
        "for (uint i = 0; i < n; i++) { if (i == 2) continue; else out[i] = i; }
         while (n > 0) { break; }
         do { out[0] += 1; } while (out[0] < 4);",
    );
    assert!(matches!(
        &stmts[0],
        Stmt::For {
            init: Some(_),
            cond: Some(_),
            step: Some(_),
            ..
        }
    ));
    assert!(matches!(&stmts[1], Stmt::While { .. }));
    assert!(matches!(&stmts[2], Stmt::DoWhile { .. }));
}

#[test]
fn test_parse_ternary_and_cast() {
    let stmts = kernel_body("out[0] = (int)(n < 2 ? 1.5f : 2.5f);");
    let Stmt::Expr(expr) = &stmts[0] else {
        panic!("expected expression statement");
    };
    let ExprKind::Assign { op: None, value, .. } = &expr.kind else {
        panic!("expected plain assignment");
    };
    let ExprKind::Cast { ty, expr } = &value.kind else {
        panic!("expected cast, got {:?}", value.kind);
    };
    assert_eq!(*ty, ScalarType::Int);
    assert!(matches!(expr.kind, ExprKind::Ternary { .. }));
}

#[test]
fn test_parse_compound_assignment() {
    let stmts = kernel_body("out[0] <<= 1;");
    let Stmt::Expr(expr) = &stmts[0] else {
        panic!("expected expression statement");
    };
    assert!(matches!(
        expr.kind,
        ExprKind::Assign {
            op: Some(BinaryOp::Shl),
            ..
        }
    ));
}

#[test]
fn test_parse_equality_binds_tighter_than_bitand() {
    // n & (3 == 0)
    let stmts = kernel_body("out[0] = n & 3 == 0;");
    let Stmt::Expr(expr) = &stmts[0] else {
        panic!("expected expression statement");
    };
    let ExprKind::Assign { value, .. } = &expr.kind else {
        panic!("expected assignment");
    };
    let ExprKind::Binary { op, rhs, .. } = &value.kind else {
        panic!("expected binary expression");
    };
    assert_eq!(*op, BinaryOp::BitAnd);
    assert!(matches!(
        rhs.kind,
        ExprKind::Binary {
            op: BinaryOp::Eq,
            ..
        }
    ));
}

#[test]
fn test_parse_local_array() {
    let program = parse(
        "__kernel void k(__global float* out) {
            __local float scratch[64];
            scratch[get_local_id(0)] = 0.0f;
            barrier(CLK_LOCAL_MEM_FENCE);
        }",
    );
    let kernel = &program.kernels[0];
    assert_eq!(kernel.local_arrays[0].name, "scratch");
    assert_eq!(kernel.local_arrays[0].len, 64);
    assert_eq!(kernel.local_arrays[0].ty, ScalarType::Float);
    assert!(kernel.uses_barrier);
}

#[test]
fn test_error_return_with_value() {
    assert!(parse_err("__kernel void k() { return 1; }").contains("takes no value"));
}

#[test]
fn test_error_break_outside_loop() {
    assert!(parse_err("__kernel void k() { break; }").contains("outside of a loop"));
}

#[test]
fn test_error_non_kernel_function() {
    assert!(parse_err("void helper() { }").contains("__kernel"));
}

#[test]
fn test_error_duplicate_kernel() {
    assert!(parse_err("__kernel void k() { } __kernel void k() { }").contains("redefinition"));
}

#[test]
fn test_error_unqualified_pointer() {
    assert!(parse_err("__kernel void k(int* p) { }").contains("__global"));
}

#[test]
fn test_error_local_array_needs_constant_length() {
    let err = parse_err("__kernel void k(const uint n) { __local int s[n]; }");
    assert!(err.contains("positive integer constant"));
}

#[test]
fn test_error_assign_to_rvalue() {
    assert!(parse_err("__kernel void k() { 1 = 2; }").contains("not assignable"));
}

#[test]
fn test_error_missing_semicolon_names_token() {
    let err = parse_err("__kernel void k(__global int* o) { o[0] = 1 }");
    assert!(err.contains("expected `;`"), "{}", err);
}
