//! Effective state resolution, evaluated on every read.

use super::graph::LiveContainer;
use crate::state::StateSnapshot;
use crate::types::{ContainerState, Health, StackStatus};

/// Resolves what a container is doing right now.
///
/// Precedence: an inactive stack forces `exited` even over a per-service
/// override; otherwise a per-service override wins; otherwise the stack
/// status decides, with a running stack keeping the catalog placeholder so
/// individual services can be down inside an up stack.
pub fn effective_state(container: &LiveContainer, state: &StateSnapshot) -> ContainerState {
    if container.is_standalone() {
        return container.placeholder;
    }

    let stack = state.stack(&container.stack);
    if stack == StackStatus::Inactive {
        return ContainerState::Exited;
    }
    if let Some(service) = state.service(&container.stack, &container.service) {
        return service.container_state();
    }

    match stack {
        StackStatus::Running => container.placeholder,
        StackStatus::Paused if container.placeholder.is_up() => ContainerState::Paused,
        StackStatus::Paused => container.placeholder,
        StackStatus::Exited | StackStatus::Inactive => ContainerState::Exited,
    }
}

/// Health is only reported while the container runs.
pub fn effective_health(container: &LiveContainer, state: ContainerState) -> Health {
    if state == ContainerState::Running {
        container.health
    } else {
        Health::None
    }
}

/// Exit code as reported for the resolved state.
pub fn effective_exit_code(container: &LiveContainer, state: ContainerState) -> i64 {
    match state {
        ContainerState::Exited | ContainerState::Dead => {
            if container.placeholder == ContainerState::Exited {
                container.exit_code
            } else {
                // stopped through the store: the engine's SIGTERM exit
                0
            }
        }
        _ => 0,
    }
}
