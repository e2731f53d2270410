mod chunker;
mod pipeline;
