//! The post-register-allocation lowering pipeline (spec §4.5.2-§4.5.3): phi
//! elimination, then stack-object and frame lowering once every spill slot and
//! local has a real offset. Runs once per function, after `regalloc::allocate_function`.

pub mod frame_lowering;
pub mod phi_elim;
pub mod stack_lowering;

use crate::mir::function::MFunction;
use crate::target::TargetAdapter;

pub fn run<T: TargetAdapter>(f: &mut MFunction, target: &T) {
    phi_elim::run(f, target);
    let body_size = f.frame.calculate_offsets();
    stack_lowering::run(f, target);
    frame_lowering::run(f, target, body_size);
}
