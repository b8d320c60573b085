//! Wire types. All field names here are part of the JSON contract.

pub mod greeter;
pub mod tasks;

pub use tasks::{
    BatchCreateTasksResponse, CreateTaskRequest, DeleteTaskResponse, GetTaskQuery,
    ListTasksQuery, ListTasksResponse, TaskChangeEventView, TaskEventView, TaskUpdateRequest,
    TaskUpdateResponse, TaskView, UpdateTaskRequest, WatchQuery,
};
