mod pipeline;
mod yahoo_api;
