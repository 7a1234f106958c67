//! End-to-end hook scenarios: a scripted binary, real hooks, a full exploration.

use koi_bait::{koi_fgets, koi_free, koi_malloc, koi_strcpy};
use koi_core::{Expr, Register, layout};
use koi_processor::{Cpu, ElfImage, Swimmer};
use koi_test_utils::{Cond, MockCpu, ScriptedInsn};
use pretty_assertions::assert_eq;

fn swimmer() -> Swimmer<MockCpu> {
    Swimmer::with_image(MockCpu::new(), &ElfImage::default())
}

// S1 — CONSTRAINT-INJECTION SOLVE
// ================================================================================================

const PASSWORD_PTR: u64 = 0x7000_1000;
const EXPECTED_PTR: u64 = 0x3000;
const CHECK_JCC: u64 = 0x1019;

/// strcmp model: asserts byte-wise inequality on the following conditional jump, so the
/// fallthrough (equal) side carries the equality constraint.
fn strcmp_injector(s: &mut Swimmer<MockCpu>, _addr: u64) -> u64 {
    let user = s.read_register(Register::Rdi);
    let expected = s.read_string(s.read_register(Register::Rsi));

    let mut equality = Vec::new();
    for (i, byte) in expected.bytes().enumerate() {
        let sym = s.memory_expr(user + i as u64).expect("user byte is symbolic");
        equality.push(Expr::eq(sym, Expr::bv(u64::from(byte), 8)));
    }
    s.inject_jump_condition(CHECK_JCC, Expr::lnot(Expr::land(equality)));
    0
}

#[test]
fn strcmp_injection_recovers_the_password() {
    let mut s = swimmer();

    // target string lives in the image
    for (i, byte) in b"sexy1337\0".iter().enumerate() {
        s.write_memory(EXPECTED_PTR + i as u64, *byte);
    }

    // main: fgets(buf, 9); if (strcmp(buf, "sexy1337")) goto fail; else success
    s.cpu_mut().script(0x1000, ScriptedInsn::mov_reg_imm(Register::Rdi, PASSWORD_PTR));
    s.cpu_mut().script(0x1005, ScriptedInsn::mov_reg_imm(Register::Rsi, 9));
    s.cpu_mut().script(0x100a, ScriptedInsn::call(0xf000));
    s.cpu_mut().script(0x100f, ScriptedInsn::mov_reg_imm(Register::Rsi, EXPECTED_PTR));
    s.cpu_mut().script(0x1014, ScriptedInsn::call(0xf100));
    s.cpu_mut()
        .script(CHECK_JCC, ScriptedInsn::jcc(Cond::MemEq { addr: 0x7100, value: 1 }, 0x2000, 0x101b));
    s.cpu_mut().script(0x101b, ScriptedInsn::nop(1)); // success path
    s.cpu_mut().script(0x2000, ScriptedInsn::hlt()); // failure path

    s.hook_function(0xf000, koi_fgets);
    s.hook_function(0xf100, strcmp_injector);

    s.set_pc(0x1000);
    assert!(s.explore(0x101b, 0x20, 4));

    // the satisfying model spells the password byte by byte
    let model = s.get_sat_model();
    let mut password = String::new();
    for i in 0..8 {
        let expr = s.memory_expr(PASSWORD_PTR + i).expect("password byte is symbolic");
        let Expr::Var { id, .. } = expr.as_ref() else {
            panic!("password byte {i} is not a variable");
        };
        password.push(model[id] as u8 as char);
    }
    assert_eq!(password, "sexy1337");
}

// S2 — DOUBLE FREE
// ================================================================================================

#[test]
fn a_double_free_is_observable_after_exploration() {
    let mut s = swimmer();

    // p = malloc(16); free(p); free(p);
    s.cpu_mut().script(0x1000, ScriptedInsn::mov_reg_imm(Register::Rdi, 16));
    s.cpu_mut().script(0x1005, ScriptedInsn::call(0xf000));
    s.cpu_mut().script(0x100a, ScriptedInsn::mov_reg_reg(Register::Rdi, Register::Rax));
    s.cpu_mut().script(0x100d, ScriptedInsn::call(0xf010));
    s.cpu_mut().script(0x1012, ScriptedInsn::call(0xf010));
    s.cpu_mut().script(0x1017, ScriptedInsn::hlt());

    s.hook_function(0xf000, koi_malloc);
    s.hook_function(0xf010, koi_free);

    s.set_pc(0x1000);
    assert!(!s.explore(0, 0, 0));

    // the buffer died at the first free; the second free changed nothing
    let ptr = layout::HEAP_START;
    assert!(!s.stat_heap_memory(ptr, true));
    assert_eq!(s.get_heap_origin(ptr, true), 0x1005);
    assert_eq!(s.get_heap_sink(ptr, true), 0x100d);
    assert!(!s.free_heap_memory(ptr, 0x9999));
}

// S3 — USE AFTER FREE
// ================================================================================================

/// fprintf("%s", p) detector: records liveness and sink of its string argument.
fn fprintf_detector(s: &mut Swimmer<MockCpu>, _addr: u64) -> u64 {
    let ptr = s.read_register(Register::Rsi);
    let live = s.stat_heap_memory(ptr, true);
    let sink = s.get_heap_sink(ptr, true);
    s.write_memory(0x9200, u8::from(live));
    s.cpu_mut().write_memory_area(0x9208, &sink.to_le_bytes());
    0
}

#[test]
fn a_use_after_free_reports_the_free_site() {
    let mut s = swimmer();

    // p = malloc(16); free(p); fprintf(stderr, "%s", p);
    s.cpu_mut().script(0x1000, ScriptedInsn::mov_reg_imm(Register::Rdi, 16));
    s.cpu_mut().script(0x1005, ScriptedInsn::call(0xf000));
    s.cpu_mut().script(0x100a, ScriptedInsn::mov_reg_reg(Register::Rsi, Register::Rax));
    s.cpu_mut().script(0x100d, ScriptedInsn::mov_reg_reg(Register::Rdi, Register::Rax));
    s.cpu_mut().script(0x1010, ScriptedInsn::call(0xf010));
    s.cpu_mut().script(0x1015, ScriptedInsn::call(0xf020));
    s.cpu_mut().script(0x101a, ScriptedInsn::hlt());

    s.hook_function(0xf000, koi_malloc);
    s.hook_function(0xf010, koi_free);
    s.hook_function(0xf020, fprintf_detector);

    s.set_pc(0x1000);
    assert!(!s.explore(0, 0, 0));

    // the detector ran and saw a dead buffer whose sink is the free call site
    assert!(s.is_memory_defined(0x9200, 1));
    assert_eq!(s.read_memory(0x9200), 0);
    assert_eq!(s.cpu().read_memory_area(0x9208, 8), 0x1010u64.to_le_bytes());
}

// S4 — STACK OVERFLOW DEDUCTION
// ================================================================================================

#[test]
fn strcpy_truncates_at_the_inferred_stack_buffer() {
    let mut s = swimmer();
    let frame_base = 0x7000_2000;
    s.write_register(Register::Rbp, frame_base);
    s.write_register(Register::Rsp, frame_base);

    // a 32-byte symbolic user string
    let user = s.allocate_heap_memory("fgets", 0x10_1000, 32);

    // char buf[16]; strcpy(buf, user);
    let buf = frame_base - 16;
    s.cpu_mut().script(0x1000, ScriptedInsn::sub_rsp(16));
    s.cpu_mut().script(0x1004, ScriptedInsn::mov_reg_imm(Register::Rdi, buf));
    s.cpu_mut().script(0x1009, ScriptedInsn::mov_reg_imm(Register::Rsi, user));
    s.cpu_mut().script(0x100e, ScriptedInsn::call(0xf050));
    s.cpu_mut().script(0x1013, ScriptedInsn::hlt());
    s.hook_function(0xf050, koi_strcpy);

    s.set_pc(0x1000);
    assert!(!s.explore(0, 0, 0));

    // the frame was inferred at 16 bytes, so the 31-byte source was cut off there
    let frame = s.stackframe_containing(buf).expect("buf is in the frame");
    assert_eq!(frame.size(), 16);
    assert_eq!(s.get_stack_buffer_length(buf), 16);
    assert_eq!(s.memory_expr(buf), s.memory_expr(user));
    assert_eq!(s.memory_expr(buf + 15), s.memory_expr(user + 15));
    assert_ne!(s.memory_expr(buf + 16), s.memory_expr(user + 16));

    // the overflow predicate the reporter fires on
    let slen = 31;
    assert!(buf + slen > frame.addr());
}
